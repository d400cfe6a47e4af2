/*!
Snapshot data model.

These are the shapes persisted by every backend and handed to the time-travel
view: one [`ExecutionSnapshot`] per workflow run, one [`NodeSnapshot`] per node,
and the [`SnapshotListItem`] projection used for history lists. Field names
serialize in camelCase so exported snapshots stay readable by other tooling.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{Result, StoreError};

/// Current snapshot format version
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0.0";

/// Source tag written into snapshots built by this crate
pub const SNAPSHOT_SOURCE: &str = "native";

/// Status of a whole workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(StoreError::invalid_format(format!(
                "unknown execution status '{other}'"
            ))),
        }
    }
}

/// Status of a single node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Paused,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra execution details recorded per node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

/// Error recorded against a failed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// One log line emitted by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLogEntry {
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// State of one node in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub node_type: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<NodeLogEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NodeMetadata>,
}

impl NodeSnapshot {
    /// Create a node snapshot with the given id and status; everything else empty
    pub fn new<S: Into<String>>(node_id: S, status: NodeStatus) -> Self {
        let node_id = node_id.into();
        Self {
            node_name: node_id.clone(),
            node_id,
            node_type: String::new(),
            status,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
            inputs: Value::Null,
            outputs: Value::Null,
            error: None,
            logs: None,
            metadata: None,
        }
    }

    pub fn with_type<S: Into<String>>(mut self, node_type: S) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_io(mut self, inputs: Value, outputs: Value) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.metadata.get_or_insert_with(NodeMetadata::default).tokens_used = Some(tokens);
        self
    }

    /// Tokens consumed by this node, zero when not recorded
    pub fn tokens_used(&self) -> u64 {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.tokens_used)
            .unwrap_or(0)
    }
}

/// Run-level error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

/// Counts derived from the node map; never edited independently
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    #[serde(default)]
    pub total_tokens_used: u64,
}

/// Codec parameters recorded on a compressed snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionInfo {
    pub algorithm: String,
    pub level: u32,
    pub original_size: usize,
    pub compressed_size: usize,
    /// SHA-256 of the canonical uncompressed snapshot JSON
    pub content_hash: String,
}

/// Snapshot bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionInfo>,
    #[serde(default)]
    pub source: String,
}

impl Default for SnapshotMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            version: SNAPSHOT_FORMAT_VERSION.to_string(),
            compressed: false,
            compression: None,
            source: SNAPSHOT_SOURCE.to_string(),
        }
    }
}

/// Persisted record of one workflow run, keyed by `execution_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub node_snapshots: BTreeMap<String, NodeSnapshot>,
    #[serde(default)]
    pub execution_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub variables: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
    #[serde(default)]
    pub summary: ExecutionSummary,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

impl ExecutionSnapshot {
    /// Create an empty snapshot for a run that started at `started_at`
    pub fn new<S1, S2>(execution_id: S1, workflow_id: S2, started_at: DateTime<Utc>) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            workflow_name: None,
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            duration_ms: None,
            node_snapshots: BTreeMap::new(),
            execution_order: Vec::new(),
            current_node_id: None,
            inputs: Value::Null,
            outputs: Value::Null,
            variables: Value::Null,
            error: None,
            summary: ExecutionSummary::default(),
            metadata: SnapshotMetadata::default(),
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.workflow_name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Add a node and refresh the summary
    pub fn with_node(mut self, node: NodeSnapshot) -> Self {
        self.node_snapshots.insert(node.node_id.clone(), node);
        crate::utils::recompute_summary(&mut self);
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.metadata.compressed
    }

    /// Project onto the list view shape
    pub fn to_list_item(&self) -> SnapshotListItem {
        SnapshotListItem::from(self)
    }
}

/// Node-free projection of a snapshot used by history lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotListItem {
    pub execution_id: String,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub summary: ExecutionSummary,
}

impl From<&ExecutionSnapshot> for SnapshotListItem {
    fn from(snapshot: &ExecutionSnapshot) -> Self {
        Self {
            execution_id: snapshot.execution_id.clone(),
            workflow_id: snapshot.workflow_id.clone(),
            workflow_name: snapshot.workflow_name.clone(),
            status: snapshot.status,
            started_at: snapshot.started_at,
            completed_at: snapshot.completed_at,
            duration_ms: snapshot.duration_ms,
            summary: snapshot.summary,
        }
    }
}
