/*!
Storage backends for execution snapshots.

This module defines the backend abstraction (port) and its four adapters. The
store holds exactly one active [`SnapshotBackend`], chosen once at
initialization from the capabilities described by a [`HostEnvironment`], so no
backend-specific branching leaks into the store's operations.
*/

pub mod bridge;
#[cfg(feature = "indexed")]
pub mod indexed;
pub mod key_value;
pub mod local;
pub mod memory;

pub use bridge::{BridgeBackend, HostBridge};
#[cfg(feature = "indexed")]
pub use indexed::IndexedBackend;
pub use key_value::{KeyValueBackend, KeyValueStore, MemoryKeyValueStore};
pub use local::FileKeyValueStore;
pub use memory::MemoryBackend;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{BackendKind, BackendSelection, StoreConfig};
use crate::model::{ExecutionSnapshot, SnapshotListItem};
use crate::query::SnapshotFilter;
use crate::{Result, StoreError};

/// Snapshot persistence capability shared by every backend
///
/// Contract:
/// * `save` is an upsert keyed by `execution_id`.
/// * `get` returns `Ok(None)` for unknown ids.
/// * `delete` of an unknown id is a no-op.
/// * `query_all` returns matching items in no particular order.
/// * `count` is `0` on an empty store.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<()>;

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>>;

    async fn delete(&self, execution_id: &str) -> Result<()>;

    async fn query_all(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotListItem>>;

    /// Items of one workflow; backends with a workflow index override this
    async fn query_by_workflow(
        &self,
        workflow_id: &str,
        filter: &SnapshotFilter,
    ) -> Result<Vec<SnapshotListItem>> {
        let scoped = SnapshotFilter {
            workflow_id: Some(workflow_id.to_string()),
            ..filter.clone()
        };
        self.query_all(&scoped).await
    }

    async fn count(&self, workflow_id: Option<&str>) -> Result<usize>;

    /// Release connections and handles
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Capabilities offered by the process hosting the store
///
/// Detection walks these top-down: a bridge wins over a database directory,
/// which wins over a key-value store; with none of them the store runs in
/// memory.
#[derive(Clone, Default)]
pub struct HostEnvironment {
    pub bridge: Option<Arc<dyn HostBridge>>,
    pub database_dir: Option<PathBuf>,
    pub key_value: Option<Arc<dyn KeyValueStore>>,
}

impl HostEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn HostBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_database_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.database_dir = Some(dir.into());
        self
    }

    pub fn with_key_value(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value = Some(store);
        self
    }

    /// Backend the environment supports best
    pub fn detect(&self) -> BackendKind {
        if self.bridge.is_some() {
            BackendKind::Bridge
        } else if cfg!(feature = "indexed") && self.database_dir.is_some() {
            BackendKind::Indexed
        } else if self.key_value.is_some() {
            BackendKind::KeyValue
        } else {
            BackendKind::Memory
        }
    }

    /// Resolve the configured selection against this environment
    pub fn select(&self, selection: BackendSelection) -> BackendKind {
        match selection {
            BackendSelection::Auto => self.detect(),
            BackendSelection::Forced(kind) => kind,
        }
    }
}

impl std::fmt::Debug for HostEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEnvironment")
            .field("bridge", &self.bridge.is_some())
            .field("database_dir", &self.database_dir)
            .field("key_value", &self.key_value.is_some())
            .finish()
    }
}

/// Open the backend of `kind` using the handles in `env`
///
/// Fails with [`StoreError::BackendUnavailable`] when the environment lacks
/// the capability or the backend cannot be opened. There is no fallback.
pub async fn open_backend(
    kind: BackendKind,
    env: &HostEnvironment,
    config: &StoreConfig,
) -> Result<Arc<dyn SnapshotBackend>> {
    match kind {
        BackendKind::Bridge => {
            let bridge = env.bridge.clone().ok_or_else(|| {
                StoreError::backend_unavailable(kind, "no host bridge in the environment")
            })?;
            Ok(Arc::new(BridgeBackend::new(bridge)))
        }
        BackendKind::Indexed => open_indexed(env, config).await,
        BackendKind::KeyValue => {
            let store = env.key_value.clone().ok_or_else(|| {
                StoreError::backend_unavailable(kind, "no key-value store in the environment")
            })?;
            Ok(Arc::new(KeyValueBackend::new(store, &config.store_name)))
        }
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

#[cfg(feature = "indexed")]
async fn open_indexed(
    env: &HostEnvironment,
    config: &StoreConfig,
) -> Result<Arc<dyn SnapshotBackend>> {
    let dir = env.database_dir.as_ref().ok_or_else(|| {
        StoreError::backend_unavailable(BackendKind::Indexed, "no database directory configured")
    })?;
    let backend = IndexedBackend::open(dir, &config.db_name, &config.store_name)
        .await
        .map_err(|e| match e {
            StoreError::BackendUnavailable { .. } => e,
            other => StoreError::backend_unavailable(BackendKind::Indexed, other.to_string()),
        })?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "indexed"))]
async fn open_indexed(
    _env: &HostEnvironment,
    _config: &StoreConfig,
) -> Result<Arc<dyn SnapshotBackend>> {
    Err(StoreError::backend_unavailable(
        BackendKind::Indexed,
        "built without the `indexed` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_order() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let bridge: Arc<dyn HostBridge> = Arc::new(bridge::LoopbackBridge::new(MemoryBackend::new()));

        assert_eq!(HostEnvironment::new().detect(), BackendKind::Memory);
        assert_eq!(
            HostEnvironment::new().with_key_value(kv.clone()).detect(),
            BackendKind::KeyValue
        );
        #[cfg(feature = "indexed")]
        assert_eq!(
            HostEnvironment::new()
                .with_key_value(kv.clone())
                .with_database_dir("/tmp/rewind")
                .detect(),
            BackendKind::Indexed
        );
        assert_eq!(
            HostEnvironment::new()
                .with_key_value(kv)
                .with_database_dir("/tmp/rewind")
                .with_bridge(bridge)
                .detect(),
            BackendKind::Bridge
        );
    }

    #[test]
    fn test_forced_selection_ignores_environment() {
        let env = HostEnvironment::new();
        assert_eq!(
            env.select(BackendSelection::Forced(BackendKind::KeyValue)),
            BackendKind::KeyValue
        );
        assert_eq!(env.select(BackendSelection::Auto), BackendKind::Memory);
    }

    #[tokio::test]
    async fn test_missing_capability_is_backend_unavailable() {
        let env = HostEnvironment::new();
        let config = StoreConfig::default();

        for kind in [BackendKind::Bridge, BackendKind::KeyValue, BackendKind::Indexed] {
            match open_backend(kind, &env, &config).await {
                Err(err) => assert!(err.is_backend_unavailable(), "{kind}: {err}"),
                Ok(_) => panic!("{kind} should not open without its capability"),
            }
        }

        let memory = open_backend(BackendKind::Memory, &env, &config).await.unwrap();
        assert_eq!(memory.kind(), BackendKind::Memory);
    }
}
