/*!
In-memory backend, the fallback when the host offers no persistent storage.
*/

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::SnapshotBackend;
use crate::config::BackendKind;
use crate::model::{ExecutionSnapshot, SnapshotListItem};
use crate::query::SnapshotFilter;
use crate::{Result, StoreError};

/// Process-local map whose lifetime is that of the owning store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshots: RwLock<HashMap<String, ExecutionSnapshot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::corrupt("in-memory snapshot map is poisoned")
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .map_err(poisoned)?
            .insert(snapshot.execution_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .map_err(poisoned)?
            .get(execution_id)
            .cloned())
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        self.snapshots.write().map_err(poisoned)?.remove(execution_id);
        Ok(())
    }

    async fn query_all(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotListItem>> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        Ok(snapshots
            .values()
            .map(SnapshotListItem::from)
            .filter(|item| filter.matches(item))
            .collect())
    }

    async fn count(&self, workflow_id: Option<&str>) -> Result<usize> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        Ok(match workflow_id {
            Some(workflow_id) => snapshots
                .values()
                .filter(|s| s.workflow_id == workflow_id)
                .count(),
            None => snapshots.len(),
        })
    }

    async fn close(&self) -> Result<()> {
        self.snapshots.write().map_err(poisoned)?.clear();
        Ok(())
    }
}
