/*!
Execution engine state shapes.

The workflow engine is an external collaborator; these are the shapes it hands
over and that [`crate::utils::create_snapshot_from_execution`] turns into a
persisted snapshot. The store itself never calls into the engine.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{ExecutionStatus, NodeStatus};

/// Error raised by the engine for a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineLogEntry {
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Live state of one node as tracked by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionState {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub inputs: Option<Value>,
    #[serde(default)]
    pub outputs: Option<Value>,
    #[serde(default)]
    pub error: Option<EngineError>,
    #[serde(default)]
    pub logs: Option<Vec<EngineLogEntry>>,
    #[serde(default)]
    pub retry_count: Option<u32>,
}

impl NodeExecutionState {
    pub fn new<S: Into<String>>(node_id: S, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            start_time: None,
            end_time: None,
            duration: None,
            inputs: None,
            outputs: None,
            error: None,
            logs: None,
            retry_count: None,
        }
    }
}

/// Live state of a whole run as tracked by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionState {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub node_states: BTreeMap<String, NodeExecutionState>,
    #[serde(default)]
    pub current_node_ids: Vec<String>,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub error: Option<EngineError>,
}
