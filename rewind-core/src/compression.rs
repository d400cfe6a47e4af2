/*!
Compression adapters and the snapshot codec.

Byte-level compression sits behind [`CompressionAdapter`]; the snapshot codec
([`compress_snapshot`] / [`decompress_snapshot`]) uses it to pack the bulky
JSON payloads of a snapshot (node inputs/outputs, run inputs/outputs/variables)
into base64 strings while leaving everything a list view or summary needs in
plain sight. A compressed snapshot is still snapshot-shaped, so every backend
can store it without knowing about the codec.
*/

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

use crate::model::{CompressionInfo, ExecutionSnapshot};
use crate::{Result, StoreError};

/// Compression abstraction for snapshot payloads
pub trait CompressionAdapter {
    /// Compress the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress the input data
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of the compression algorithm
    fn algorithm_name(&self) -> &str;
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use rewind_core::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = b"node output node output node output";
/// let compressed = compressor.compress(data)?;
/// let decompressed = compressor.decompress(&compressed)?;
/// assert_eq!(data, &decompressed[..]);
/// # Ok::<(), rewind_core::StoreError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a new gzip compressor with the specified level (0-9, clamped)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(9)),
        }
    }

    /// Fastest compression (level 1)
    pub fn fast() -> Self {
        Self::with_level(1)
    }

    /// Smallest output (level 9)
    pub fn max() -> Self {
        Self::with_level(9)
    }

    /// Compression level in effect
    pub fn level(&self) -> u32 {
        self.compression_level.level()
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data).map_err(|e| {
            StoreError::compression(format!("Failed to write data for compression: {e}"))
        })?;

        encoder
            .finish()
            .map_err(|e| StoreError::compression(format!("Failed to finish compression: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| StoreError::compression(format!("Failed to decompress data: {e}")))?;

        Ok(decompressed)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

/// Pass-through adapter for payloads that are already compact
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }
}

fn adapter_for(algorithm: &str, level: u32) -> Result<Box<dyn CompressionAdapter>> {
    match algorithm {
        "gzip" => Ok(Box::new(GzipCompressor::with_level(level))),
        "none" => Ok(Box::new(NoCompression)),
        other => Err(StoreError::invalid_format(format!(
            "unsupported compression algorithm '{other}'"
        ))),
    }
}

/// SHA-256 of the canonical JSON form of an uncompressed snapshot
pub fn content_hash(snapshot: &ExecutionSnapshot) -> Result<String> {
    let bytes = serde_json::to_vec(snapshot)?;
    Ok(hash_bytes(&bytes))
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compress a snapshot's payloads with gzip at `level`
///
/// Already-compressed snapshots are returned unchanged.
pub fn compress_snapshot(snapshot: &ExecutionSnapshot, level: u32) -> Result<ExecutionSnapshot> {
    let compressor = GzipCompressor::with_level(level);
    let level = compressor.level();
    compress_snapshot_with(snapshot, &compressor, level)
}

/// Compress a snapshot's payloads with an explicit adapter, recording `level`
pub fn compress_snapshot_with<C: CompressionAdapter + ?Sized>(
    snapshot: &ExecutionSnapshot,
    compressor: &C,
    level: u32,
) -> Result<ExecutionSnapshot> {
    if snapshot.metadata.compressed {
        return Ok(snapshot.clone());
    }

    let mut packed = snapshot.clone();
    packed.metadata.compression = None;

    let canonical = serde_json::to_vec(&packed)?;
    let original_size = canonical.len();
    let content_hash = hash_bytes(&canonical);

    for node in packed.node_snapshots.values_mut() {
        pack_value(&mut node.inputs, compressor)?;
        pack_value(&mut node.outputs, compressor)?;
    }
    pack_value(&mut packed.inputs, compressor)?;
    pack_value(&mut packed.outputs, compressor)?;
    pack_value(&mut packed.variables, compressor)?;

    packed.metadata.compressed = true;
    let compressed_size = serde_json::to_vec(&packed)?.len();
    packed.metadata.compression = Some(CompressionInfo {
        algorithm: compressor.algorithm_name().to_string(),
        level,
        original_size,
        compressed_size,
        content_hash,
    });

    Ok(packed)
}

/// Reverse [`compress_snapshot`], verifying the recorded content hash
///
/// Uncompressed snapshots are returned unchanged.
pub fn decompress_snapshot(snapshot: &ExecutionSnapshot) -> Result<ExecutionSnapshot> {
    if !snapshot.metadata.compressed {
        return Ok(snapshot.clone());
    }

    let info = snapshot.metadata.compression.clone().ok_or_else(|| {
        StoreError::invalid_format(format!(
            "snapshot {} is marked compressed but carries no codec parameters",
            snapshot.execution_id
        ))
    })?;
    let compressor = adapter_for(&info.algorithm, info.level)?;

    let mut unpacked = snapshot.clone();
    for node in unpacked.node_snapshots.values_mut() {
        unpack_value(&mut node.inputs, compressor.as_ref())?;
        unpack_value(&mut node.outputs, compressor.as_ref())?;
    }
    unpack_value(&mut unpacked.inputs, compressor.as_ref())?;
    unpack_value(&mut unpacked.outputs, compressor.as_ref())?;
    unpack_value(&mut unpacked.variables, compressor.as_ref())?;

    unpacked.metadata.compressed = false;
    unpacked.metadata.compression = None;

    let actual = content_hash(&unpacked)?;
    if actual != info.content_hash {
        return Err(StoreError::IntegrityCheckFailed {
            expected: info.content_hash,
            actual,
        });
    }

    Ok(unpacked)
}

fn pack_value<C: CompressionAdapter + ?Sized>(value: &mut Value, compressor: &C) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let compressed = compressor.compress(&bytes)?;
    *value = Value::String(STANDARD.encode(compressed));
    Ok(())
}

fn unpack_value(value: &mut Value, compressor: &dyn CompressionAdapter) -> Result<()> {
    let encoded = value.as_str().ok_or_else(|| {
        StoreError::invalid_format("compressed payload is not a base64 string")
    })?;
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| StoreError::compression(format!("Invalid base64 payload: {e}")))?;
    let bytes = compressor.decompress(&compressed)?;
    *value = serde_json::from_slice(&bytes)?;
    Ok(())
}
