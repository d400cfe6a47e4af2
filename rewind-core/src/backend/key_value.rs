/*!
Flat key-value backend.

A key-value store can only get, set and remove strings by key, so listing is
emulated with an explicit index entry: each snapshot lives under
`"<store>:<execution_id>"` and `"<store>:index"` holds the JSON array of every
known id. Queries fetch the index and scan the records it names.
*/

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

use super::SnapshotBackend;
use crate::config::BackendKind;
use crate::model::{ExecutionSnapshot, SnapshotListItem};
use crate::query::SnapshotFilter;
use crate::{Result, StoreError};

/// Execution id reserved for the index entry
pub const INDEX_KEY: &str = "index";

/// Minimal string key-value capability offered by the host
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;
}

/// Key-value store backed by a process-local map
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Snapshot backend over any [`KeyValueStore`]
pub struct KeyValueBackend {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    // Serializes index read-modify-write cycles within this process.
    index_lock: tokio::sync::Mutex<()>,
}

impl KeyValueBackend {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            index_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn record_key(&self, execution_id: &str) -> String {
        format!("{}:{}", self.namespace, execution_id)
    }

    fn index_key(&self) -> String {
        format!("{}:{}", self.namespace, INDEX_KEY)
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self.store.get_item(&self.index_key())? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                StoreError::corrupt(format!("snapshot index {}: {e}", self.index_key()))
            }),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, ids: &[String]) -> Result<()> {
        let raw = serde_json::to_string(ids)?;
        self.store.set_item(&self.index_key(), &raw)
    }

    fn read_record(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>> {
        match self.store.get_item(&self.record_key(execution_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn check_id(execution_id: &str) -> Result<()> {
        if execution_id == INDEX_KEY {
            return Err(StoreError::validation(format!(
                "execution id '{INDEX_KEY}' is reserved by the key-value backend"
            )));
        }
        Ok(())
    }

    /// Records listed in the index, skipping ids whose record is gone
    fn scan(&self) -> Result<Vec<ExecutionSnapshot>> {
        let mut snapshots = Vec::new();
        for id in self.read_index()? {
            match self.read_record(&id)? {
                Some(snapshot) => snapshots.push(snapshot),
                None => warn!(execution_id = %id, "Index lists a snapshot with no record"),
            }
        }
        Ok(snapshots)
    }
}

impl std::fmt::Debug for KeyValueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueBackend")
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[async_trait]
impl SnapshotBackend for KeyValueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        Self::check_id(&snapshot.execution_id)?;
        let raw = serde_json::to_string(snapshot)?;

        let _guard = self.index_lock.lock().await;
        self.store
            .set_item(&self.record_key(&snapshot.execution_id), &raw)?;

        let mut ids = self.read_index()?;
        if !ids.iter().any(|id| id == &snapshot.execution_id) {
            ids.push(snapshot.execution_id.clone());
            self.write_index(&ids)?;
        }
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>> {
        if execution_id == INDEX_KEY {
            return Ok(None);
        }
        self.read_record(execution_id)
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        if execution_id == INDEX_KEY {
            return Ok(());
        }

        let _guard = self.index_lock.lock().await;
        self.store.remove_item(&self.record_key(execution_id))?;

        let mut ids = self.read_index()?;
        let before = ids.len();
        ids.retain(|id| id != execution_id);
        if ids.len() != before {
            self.write_index(&ids)?;
        }
        Ok(())
    }

    async fn query_all(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotListItem>> {
        Ok(self
            .scan()?
            .iter()
            .map(SnapshotListItem::from)
            .filter(|item| filter.matches(item))
            .collect())
    }

    async fn count(&self, workflow_id: Option<&str>) -> Result<usize> {
        match workflow_id {
            None => Ok(self.scan()?.len()),
            Some(workflow_id) => Ok(self
                .scan()?
                .iter()
                .filter(|s| s.workflow_id == workflow_id)
                .count()),
        }
    }
}
