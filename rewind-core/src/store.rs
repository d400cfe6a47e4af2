/*!
Snapshot store facade.

[`SnapshotStore`] is the only entry point the rest of an application needs:
it picks a backend once, applies sanitizing and compression on the way in,
decompresses on the way out, sorts and pages history queries, enforces
retention, and notifies listeners after every successful write.

Writes to the same execution id are serialized through a per-id async lock,
so a node update never loses a concurrent update to the same run. Writes to
different ids run in parallel.
*/

use chrono::{Duration, Utc};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::backend::{open_backend, HostEnvironment, SnapshotBackend};
use crate::compression::{compress_snapshot, decompress_snapshot};
use crate::config::{BackendKind, CleanupOptions, StoreConfig};
use crate::events::{ListenerRegistry, StoreEvent, Subscription};
use crate::model::{ExecutionSnapshot, NodeSnapshot, SnapshotListItem};
use crate::observability::{record_snapshot_size, OperationTimer};
use crate::query::{sort_and_paginate, sort_items, SnapshotFilter, SnapshotQuery, SortField, SortOrder};
use crate::utils::{recompute_summary, remove_sensitive_data, validate_import_payload, validate_snapshot};
use crate::{Result, StoreError};

/// Store logs go to `debug`, or `info` when the config asks for debug output
macro_rules! store_log {
    ($store:expr, $($arg:tt)+) => {
        if $store.config.debug {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Lifecycle of a store instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Detecting,
    BackendReady(BackendKind),
    Initialized(BackendKind),
}

impl StoreState {
    pub fn is_initialized(&self) -> bool {
        matches!(self, StoreState::Initialized(_))
    }
}

struct Active {
    state: StoreState,
    backend: Option<Arc<dyn SnapshotBackend>>,
}

/// Backend-agnostic execution snapshot store
pub struct SnapshotStore {
    config: StoreConfig,
    environment: HostEnvironment,
    active: RwLock<Active>,
    listeners: ListenerRegistry,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SnapshotStore {
    pub fn new(config: StoreConfig, environment: HostEnvironment) -> Self {
        Self {
            config,
            environment,
            active: RwLock::new(Active {
                state: StoreState::Uninitialized,
                backend: None,
            }),
            listeners: ListenerRegistry::new(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Store on the in-memory backend with default settings
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::default(), HostEnvironment::new())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn state(&self) -> StoreState {
        self.active.read().await.state
    }

    /// Active backend, if initialized
    pub async fn backend_kind(&self) -> Option<BackendKind> {
        match self.active.read().await.state {
            StoreState::Initialized(kind) => Some(kind),
            _ => None,
        }
    }

    /// Select and open the backend; calling it again is a no-op
    pub async fn initialize(&self) -> Result<()> {
        if self.active.read().await.state.is_initialized() {
            return Ok(());
        }

        let mut active = self.active.write().await;
        if active.state.is_initialized() {
            return Ok(());
        }

        self.config.validate()?;
        active.state = StoreState::Detecting;
        let kind = self.environment.select(self.config.backend);
        store_log!(self, backend = %kind, "Opening snapshot backend");

        match open_backend(kind, &self.environment, &self.config).await {
            Ok(backend) => {
                active.state = StoreState::BackendReady(kind);
                active.backend = Some(backend);
                active.state = StoreState::Initialized(kind);
                store_log!(self, backend = %kind, "Snapshot store initialized");
                Ok(())
            }
            Err(e) => {
                active.state = StoreState::Uninitialized;
                tracing::warn!(backend = %kind, error = %e, "Snapshot backend failed to open");
                Err(e)
            }
        }
    }

    async fn backend(&self) -> Result<Arc<dyn SnapshotBackend>> {
        self.initialize().await?;
        let active = self.active.read().await;
        active.backend.clone().ok_or_else(|| {
            StoreError::storage("snapshot store was destroyed during the operation")
        })
    }

    /// Run `write` while holding the write lock for `execution_id`
    async fn locked<T, F, Fut>(&self, execution_id: &str, write: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock = {
            let mut locks = self.write_locks.lock().await;
            locks.entry(execution_id.to_string()).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().await;
            write().await
        };

        let mut locks = self.write_locks.lock().await;
        drop(lock);
        if locks
            .get(execution_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(execution_id);
        }

        result
    }

    /// Normalize, sanitize and compress a snapshot, then write it
    async fn persist(
        &self,
        backend: &Arc<dyn SnapshotBackend>,
        snapshot: &ExecutionSnapshot,
    ) -> Result<()> {
        let mut prepared = decompress_snapshot(snapshot)?;
        validate_snapshot(&prepared)?;

        if self.config.exclude_sensitive_data {
            prepared = remove_sensitive_data(&prepared, &self.config.sensitive_fields);
        }
        if self.config.compress {
            prepared = compress_snapshot(&prepared, self.config.compression_level)?;
        }

        if let Some(info) = &prepared.metadata.compression {
            record_snapshot_size(backend.kind(), info.compressed_size);
        }

        backend.save(&prepared).await
    }

    fn emit(&self, event: StoreEvent) {
        self.listeners.emit(&event);
    }

    /// Persist a whole snapshot, replacing any snapshot with the same id
    pub async fn save_snapshot(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        let backend = self.backend().await?;
        let timer = OperationTimer::start("save_snapshot", backend.kind());

        let result = self
            .locked(&snapshot.execution_id, || self.persist(&backend, snapshot))
            .await;
        timer.finish(&result);
        result?;

        store_log!(self, execution_id = %snapshot.execution_id, "Snapshot saved");
        self.emit(StoreEvent::Saved {
            execution_id: snapshot.execution_id.clone(),
        });
        Ok(())
    }

    /// Fetch a snapshot, always in decompressed form
    pub async fn get_snapshot(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>> {
        let backend = self.backend().await?;
        let timer = OperationTimer::start("get_snapshot", backend.kind());

        let result = match backend.get(execution_id).await {
            Ok(Some(stored)) => decompress_snapshot(&stored).map(Some),
            other => other,
        };
        timer.finish(&result);
        result
    }

    /// Fetch one node of a snapshot
    pub async fn get_node_snapshot(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<NodeSnapshot>> {
        Ok(self
            .get_snapshot(execution_id)
            .await?
            .and_then(|mut snapshot| snapshot.node_snapshots.remove(node_id)))
    }

    /// Delete a snapshot; unknown ids are not an error
    pub async fn delete_snapshot(&self, execution_id: &str) -> Result<()> {
        let backend = self.backend().await?;
        let timer = OperationTimer::start("delete_snapshot", backend.kind());

        let result = self
            .locked(execution_id, || backend.delete(execution_id))
            .await;
        timer.finish(&result);
        result?;

        store_log!(self, execution_id = %execution_id, "Snapshot deleted");
        self.emit(StoreEvent::Deleted {
            execution_id: execution_id.to_string(),
        });
        Ok(())
    }

    /// Filtered, sorted, paginated history
    pub async fn query_snapshots(&self, query: &SnapshotQuery) -> Result<Vec<SnapshotListItem>> {
        let backend = self.backend().await?;
        let timer = OperationTimer::start("query_snapshots", backend.kind());

        let filter = query.filter();
        let result = match &filter.workflow_id {
            Some(workflow_id) => backend.query_by_workflow(workflow_id, &filter).await,
            None => backend.query_all(&filter).await,
        }
        .map(|items| sort_and_paginate(items, query));
        timer.finish(&result);
        result
    }

    /// Number of stored snapshots, optionally for one workflow
    pub async fn get_snapshot_count(&self, workflow_id: Option<&str>) -> Result<usize> {
        let backend = self.backend().await?;
        let timer = OperationTimer::start("count_snapshots", backend.kind());

        let result = backend.count(workflow_id).await;
        timer.finish(&result);
        result
    }

    /// Insert or replace one node of a stored snapshot and refresh its summary
    ///
    /// Fails with [`StoreError::NotFound`] when the execution is unknown.
    pub async fn update_node_snapshot(
        &self,
        execution_id: &str,
        node_id: &str,
        node: NodeSnapshot,
    ) -> Result<()> {
        let backend = self.backend().await?;
        let timer = OperationTimer::start("update_node_snapshot", backend.kind());

        let result = self
            .locked(execution_id, || async {
                let stored = backend
                    .get(execution_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found(execution_id))?;
                let mut snapshot = decompress_snapshot(&stored)?;

                let mut node = node;
                node.node_id = node_id.to_string();
                snapshot.node_snapshots.insert(node_id.to_string(), node);
                recompute_summary(&mut snapshot);

                self.persist(&backend, &snapshot).await
            })
            .await;
        timer.finish(&result);
        result?;

        store_log!(self, execution_id = %execution_id, node_id = %node_id, "Node snapshot updated");
        self.emit(StoreEvent::Saved {
            execution_id: execution_id.to_string(),
        });
        self.emit(StoreEvent::Updated {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
        });
        Ok(())
    }

    /// Enforce age and count retention; returns how many snapshots were removed
    ///
    /// Options left unset fall back to the store configuration; zero disables
    /// a rule.
    pub async fn cleanup_snapshots(&self, options: Option<CleanupOptions>) -> Result<usize> {
        let backend = self.backend().await?;
        let timer = OperationTimer::start("cleanup_snapshots", backend.kind());

        let result = self.sweep(&backend, options.unwrap_or_default()).await;
        timer.finish(&result);
        let deleted = result?;

        store_log!(self, count = deleted, "Snapshots cleaned up");
        self.emit(StoreEvent::Cleaned { count: deleted });
        Ok(deleted)
    }

    async fn sweep(
        &self,
        backend: &Arc<dyn SnapshotBackend>,
        options: CleanupOptions,
    ) -> Result<usize> {
        let max_age_days = options.max_age_days.unwrap_or(self.config.max_age_days);
        let max_snapshots = options.max_snapshots.unwrap_or(self.config.max_snapshots);
        let mut deleted = 0;

        if max_age_days > 0 {
            let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
            let candidates = backend
                .query_all(&SnapshotFilter {
                    end_date: Some(cutoff),
                    ..SnapshotFilter::default()
                })
                .await?;
            let stale: Vec<String> = candidates
                .into_iter()
                .filter(|item| item.started_at < cutoff)
                .map(|item| item.execution_id)
                .collect();
            deleted += self.delete_many(backend, stale).await?;
        }

        if max_snapshots > 0 {
            let mut remaining = backend.query_all(&SnapshotFilter::default()).await?;
            if remaining.len() > max_snapshots {
                sort_items(&mut remaining, SortField::StartedAt, SortOrder::Asc);
                let excess = remaining.len() - max_snapshots;
                let oldest: Vec<String> = remaining
                    .into_iter()
                    .take(excess)
                    .map(|item| item.execution_id)
                    .collect();
                deleted += self.delete_many(backend, oldest).await?;
            }
        }

        Ok(deleted)
    }

    async fn delete_many(
        &self,
        backend: &Arc<dyn SnapshotBackend>,
        execution_ids: Vec<String>,
    ) -> Result<usize> {
        try_join_all(
            execution_ids
                .iter()
                .map(|id| self.locked(id, || backend.delete(id))),
        )
        .await?;

        for id in &execution_ids {
            self.emit(StoreEvent::Deleted {
                execution_id: id.clone(),
            });
        }
        Ok(execution_ids.len())
    }

    /// Pretty-printed JSON of one snapshot, always uncompressed
    pub async fn export_snapshot(&self, execution_id: &str) -> Result<String> {
        let snapshot = self
            .get_snapshot(execution_id)
            .await?
            .ok_or_else(|| StoreError::not_found(execution_id))?;
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    /// Parse, validate and save an exported snapshot
    ///
    /// Validation happens before anything is written.
    pub async fn import_snapshot(&self, json: &str) -> Result<ExecutionSnapshot> {
        let payload: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| StoreError::validation(format!("Import is not valid JSON: {e}")))?;
        validate_import_payload(&payload)?;

        let snapshot: ExecutionSnapshot = serde_json::from_value(payload)
            .map_err(|e| StoreError::validation(format!("Import is not a snapshot: {e}")))?;
        let snapshot = decompress_snapshot(&snapshot)?;
        validate_snapshot(&snapshot)?;

        self.save_snapshot(&snapshot).await?;
        Ok(snapshot)
    }

    /// Register a listener for store events
    pub fn add_event_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Close the backend, drop listeners and return to `Uninitialized`
    pub async fn destroy(&self) -> Result<()> {
        let mut active = self.active.write().await;
        let backend = active.backend.take();
        active.state = StoreState::Uninitialized;
        self.listeners.clear();
        self.write_locks.lock().await.clear();

        if let Some(backend) = backend {
            backend.close().await?;
            store_log!(self, backend = %backend.kind(), "Snapshot store destroyed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("config", &self.config)
            .field("environment", &self.environment)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
