//! Configuration module for backend selection and store settings
//!
//! [`StoreConfig`] carries the serializable options recognized by the store.
//! Runtime capabilities (a host bridge handle, a database directory, a
//! key-value store) live in [`crate::backend::HostEnvironment`] instead,
//! because they are handles rather than settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::{Result, StoreError};

/// Default database file stem for the indexed backend.
pub const DEFAULT_DB_NAME: &str = "time-travel";
/// Default table name / key namespace.
pub const DEFAULT_STORE_NAME: &str = "snapshots";
/// Default gzip level when compression is enabled.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
/// Default count-retention cap.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 100;
/// Default age-retention window in days.
pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;

/// Field names redacted when `exclude_sensitive_data` is set.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] =
    &["password", "apiKey", "token", "secret", "authorization"];

/// Enumeration of supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    /// Transactional store with secondary indexes (SQLite)
    Indexed,
    /// Flat key-value store with an explicit id index
    KeyValue,
    /// Embedded database reached through a host procedure-call bridge
    Bridge,
    /// Process-local map owned by the store instance
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Indexed => "indexed",
            BackendKind::KeyValue => "key-value",
            BackendKind::Bridge => "bridge",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the store picks its backend at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendSelection {
    /// Probe the host environment top-down: bridge, indexed, key-value, memory
    #[default]
    Auto,
    /// Use exactly this backend; fail initialization if it is not available
    Forced(BackendKind),
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub backend: BackendSelection,
    pub db_name: String,
    pub store_name: String,
    pub compress: bool,
    pub compression_level: u32,
    pub max_snapshots: usize,
    pub max_age_days: u32,
    pub exclude_sensitive_data: bool,
    pub sensitive_fields: Vec<String>,
    pub debug: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendSelection::Auto,
            db_name: DEFAULT_DB_NAME.to_string(),
            store_name: DEFAULT_STORE_NAME.to_string(),
            compress: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            exclude_sensitive_data: false,
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            debug: false,
        }
    }
}

impl StoreConfig {
    /// Force a specific backend instead of probing the environment
    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend = BackendSelection::Forced(kind);
        self
    }

    /// Enable compression at the given gzip level
    pub fn with_compression(mut self, level: u32) -> Self {
        self.compress = true;
        self.compression_level = level;
        self
    }

    pub fn with_store_name<S: Into<String>>(mut self, name: S) -> Self {
        self.store_name = name.into();
        self
    }

    pub fn with_db_name<S: Into<String>>(mut self, name: S) -> Self {
        self.db_name = name.into();
        self
    }

    /// Set both retention limits
    pub fn with_retention(mut self, max_snapshots: usize, max_age_days: u32) -> Self {
        self.max_snapshots = max_snapshots;
        self.max_age_days = max_age_days;
        self
    }

    pub fn with_sensitive_data_excluded(mut self) -> Self {
        self.exclude_sensitive_data = true;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StoreError::validation(format!("Cannot read config {}: {e}", path.display()))
        })?;
        let config: StoreConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(StoreError::validation(format!(
                "compressionLevel must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        if !is_valid_store_name(&self.store_name) {
            return Err(StoreError::validation(format!(
                "storeName '{}' must start with a letter or underscore and contain only letters, digits and underscores",
                self.store_name
            )));
        }
        if self.db_name.is_empty()
            || self.db_name.contains(['/', '\\'])
            || self.db_name.starts_with('.')
        {
            return Err(StoreError::validation(format!(
                "dbName '{}' must be a plain file name",
                self.db_name
            )));
        }
        Ok(())
    }
}

/// Whether `name` can be used as a table name or key namespace
pub fn is_valid_store_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Retention limits for a single cleanup sweep
///
/// Unset fields fall back to the store configuration. A value of zero
/// disables the corresponding rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOptions {
    pub max_age_days: Option<u32>,
    pub max_snapshots: Option<usize>,
}

impl CleanupOptions {
    pub fn max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = Some(days);
        self
    }

    pub fn max_snapshots(mut self, count: usize) -> Self {
        self.max_snapshots = Some(count);
        self
    }
}
