/*!
Native-embedded database reached through a host procedure-call bridge.

The store knows nothing about the host's storage engine. It only sends five
commands with JSON arguments and expects snapshot-shaped JSON back:

| command           | arguments                  | response              |
|-------------------|----------------------------|-----------------------|
| `save_snapshot`   | `{snapshot}`               | `null`                |
| `get_snapshot`    | `{executionId}`            | snapshot or `null`    |
| `delete_snapshot` | `{executionId}`            | `null`                |
| `query_snapshots` | `{params: filter}`         | array of list items   |
| `count_snapshots` | `{workflowId?}`            | number                |
*/

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

use super::SnapshotBackend;
use crate::config::BackendKind;
use crate::model::{ExecutionSnapshot, SnapshotListItem};
use crate::query::SnapshotFilter;
use crate::{Result, StoreError};

pub const SAVE_SNAPSHOT: &str = "save_snapshot";
pub const GET_SNAPSHOT: &str = "get_snapshot";
pub const DELETE_SNAPSHOT: &str = "delete_snapshot";
pub const QUERY_SNAPSHOTS: &str = "query_snapshots";
pub const COUNT_SNAPSHOTS: &str = "count_snapshots";

/// Procedure-call interface provided by the host process
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostBridge: Send + Sync {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value>;
}

/// Snapshot backend that forwards every call over a [`HostBridge`]
pub struct BridgeBackend {
    bridge: Arc<dyn HostBridge>,
}

impl BridgeBackend {
    pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
        Self { bridge }
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, args: Value) -> Result<T> {
        let response = self.bridge.invoke(command, args).await?;
        serde_json::from_value(response)
            .map_err(|e| StoreError::bridge(command, format!("unexpected response: {e}")))
    }
}

impl std::fmt::Debug for BridgeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl SnapshotBackend for BridgeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Bridge
    }

    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        self.bridge
            .invoke(SAVE_SNAPSHOT, json!({ "snapshot": snapshot }))
            .await?;
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>> {
        self.call(GET_SNAPSHOT, json!({ "executionId": execution_id }))
            .await
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        self.bridge
            .invoke(DELETE_SNAPSHOT, json!({ "executionId": execution_id }))
            .await?;
        Ok(())
    }

    async fn query_all(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotListItem>> {
        let items: Vec<SnapshotListItem> = self
            .call(QUERY_SNAPSHOTS, json!({ "params": filter }))
            .await?;
        // The host may ignore some filter fields; enforce them here.
        Ok(items.into_iter().filter(|item| filter.matches(item)).collect())
    }

    async fn count(&self, workflow_id: Option<&str>) -> Result<usize> {
        let args = match workflow_id {
            Some(workflow_id) => json!({ "workflowId": workflow_id }),
            None => json!({}),
        };
        self.call(COUNT_SNAPSHOTS, args).await
    }
}

/// Host side of the bridge protocol serving commands from a local backend
///
/// Useful for embedding hosts and for exercising [`BridgeBackend`] end to end.
#[derive(Debug)]
pub struct LoopbackBridge<B> {
    backend: B,
}

impl<B: SnapshotBackend> LoopbackBridge<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn required_str<'a>(command: &str, args: &'a Value, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::bridge(command, format!("missing string argument '{field}'")))
}

#[async_trait]
impl<B: SnapshotBackend> HostBridge for LoopbackBridge<B> {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value> {
        match command {
            SAVE_SNAPSHOT => {
                let snapshot = args.get("snapshot").cloned().ok_or_else(|| {
                    StoreError::bridge(command, "missing argument 'snapshot'")
                })?;
                let snapshot: ExecutionSnapshot = serde_json::from_value(snapshot)?;
                self.backend.save(&snapshot).await?;
                Ok(Value::Null)
            }
            GET_SNAPSHOT => {
                let id = required_str(command, &args, "executionId")?;
                Ok(serde_json::to_value(self.backend.get(id).await?)?)
            }
            DELETE_SNAPSHOT => {
                let id = required_str(command, &args, "executionId")?;
                self.backend.delete(id).await?;
                Ok(Value::Null)
            }
            QUERY_SNAPSHOTS => {
                let filter: SnapshotFilter = match args.get("params") {
                    Some(params) => serde_json::from_value(params.clone())?,
                    None => SnapshotFilter::default(),
                };
                Ok(serde_json::to_value(self.backend.query_all(&filter).await?)?)
            }
            COUNT_SNAPSHOTS => {
                let workflow_id = args.get("workflowId").and_then(Value::as_str);
                Ok(json!(self.backend.count(workflow_id).await?))
            }
            other => Err(StoreError::bridge(other, "unknown command")),
        }
    }
}
