/*!
Pure helpers for building, checking and rewriting snapshots.
*/

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::execution::{NodeExecutionState, WorkflowExecutionState};
use crate::model::{
    ExecutionSnapshot, ExecutionSummary, NodeError, NodeLogEntry, NodeMetadata, NodeSnapshot,
    NodeStatus, SnapshotError, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION, SNAPSHOT_SOURCE,
};
use crate::{Result, StoreError};

/// Replacement written over redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Node type recorded when the engine state does not carry one
const UNKNOWN_NODE_TYPE: &str = "unknown";

/// Build a snapshot from the engine's view of a run
///
/// Nodes that have started are listed in `execution_order`, earliest first,
/// with the node id breaking ties.
pub fn create_snapshot_from_execution(
    state: &WorkflowExecutionState,
    workflow_name: Option<String>,
) -> ExecutionSnapshot {
    let node_snapshots: BTreeMap<String, NodeSnapshot> = state
        .node_states
        .iter()
        .map(|(node_id, node_state)| (node_id.clone(), node_snapshot_from_state(node_state)))
        .collect();

    let mut started: Vec<(&String, &NodeSnapshot)> = node_snapshots
        .iter()
        .filter(|(_, node)| node.started_at.is_some())
        .collect();
    started.sort_by(|(a_id, a), (b_id, b)| {
        a.started_at.cmp(&b.started_at).then_with(|| a_id.cmp(b_id))
    });
    let execution_order = started.into_iter().map(|(id, _)| id.clone()).collect();

    let summary = calculate_summary(&node_snapshots);

    ExecutionSnapshot {
        execution_id: state.execution_id.clone(),
        workflow_id: state.workflow_id.clone(),
        workflow_name,
        status: state.status,
        started_at: state.start_time,
        completed_at: state.end_time,
        duration_ms: state.duration,
        node_snapshots,
        execution_order,
        current_node_id: state.current_node_ids.first().cloned(),
        inputs: state.variables.clone(),
        outputs: Value::Object(Map::new()),
        variables: state.variables.clone(),
        error: state.error.as_ref().map(|error| SnapshotError {
            code: error.code.clone(),
            message: error.message.clone(),
            node_id: error.node_id.clone(),
        }),
        summary,
        metadata: SnapshotMetadata {
            created_at: Utc::now(),
            version: SNAPSHOT_FORMAT_VERSION.to_string(),
            compressed: false,
            compression: None,
            source: SNAPSHOT_SOURCE.to_string(),
        },
    }
}

fn node_snapshot_from_state(state: &NodeExecutionState) -> NodeSnapshot {
    NodeSnapshot {
        node_id: state.node_id.clone(),
        node_name: state.node_id.clone(),
        node_type: UNKNOWN_NODE_TYPE.to_string(),
        status: state.status,
        started_at: state.start_time,
        completed_at: state.end_time,
        duration_ms: state.duration.unwrap_or(0),
        inputs: state.inputs.clone().unwrap_or_else(|| Value::Object(Map::new())),
        outputs: state.outputs.clone().unwrap_or_else(|| Value::Object(Map::new())),
        error: state.error.as_ref().map(|error| NodeError {
            code: error.code.clone(),
            message: error.message.clone(),
            details: error.details.clone(),
        }),
        logs: state.logs.as_ref().map(|logs| {
            logs.iter()
                .map(|log| NodeLogEntry {
                    level: log.level.clone(),
                    message: log.message.clone(),
                    timestamp: log.timestamp,
                    data: log.data.clone(),
                })
                .collect()
        }),
        metadata: Some(NodeMetadata {
            retry_count: state.retry_count,
            ..NodeMetadata::default()
        }),
    }
}

/// Derive the run summary from the node map
pub fn calculate_summary(node_snapshots: &BTreeMap<String, NodeSnapshot>) -> ExecutionSummary {
    let mut summary = ExecutionSummary {
        total_nodes: node_snapshots.len(),
        ..ExecutionSummary::default()
    };
    for node in node_snapshots.values() {
        match node.status {
            NodeStatus::Completed => summary.completed_nodes += 1,
            NodeStatus::Failed => summary.failed_nodes += 1,
            NodeStatus::Skipped => summary.skipped_nodes += 1,
            _ => {}
        }
        summary.total_tokens_used += node.tokens_used();
    }
    summary
}

/// Overwrite `summary` with the value derived from `node_snapshots`
pub fn recompute_summary(snapshot: &mut ExecutionSnapshot) {
    snapshot.summary = calculate_summary(&snapshot.node_snapshots);
}

pub fn summary_is_consistent(snapshot: &ExecutionSnapshot) -> bool {
    snapshot.summary == calculate_summary(&snapshot.node_snapshots)
}

/// Structural checks applied before a snapshot is written
pub fn validate_snapshot(snapshot: &ExecutionSnapshot) -> Result<()> {
    if snapshot.execution_id.trim().is_empty() {
        return Err(StoreError::validation("Invalid snapshot: missing executionId"));
    }
    if snapshot.workflow_id.trim().is_empty() {
        return Err(StoreError::validation("Invalid snapshot: missing workflowId"));
    }
    Ok(())
}

/// Check the raw JSON of an import for the fields every snapshot needs
pub fn validate_import_payload(payload: &Value) -> Result<()> {
    let object = payload
        .as_object()
        .ok_or_else(|| StoreError::validation("Invalid snapshot: expected a JSON object"))?;

    for field in ["executionId", "workflowId"] {
        match object.get(field) {
            Some(Value::String(value)) if !value.trim().is_empty() => {}
            _ => {
                return Err(StoreError::validation(format!(
                    "Invalid snapshot: missing {field}"
                )))
            }
        }
    }
    match object.get("nodeSnapshots") {
        Some(Value::Object(_)) => Ok(()),
        _ => Err(StoreError::validation(
            "Invalid snapshot: missing nodeSnapshots",
        )),
    }
}

/// Redact values whose key contains any of `sensitive_fields`
///
/// Matching is a case-insensitive substring test on object keys, applied to
/// node inputs and outputs and to the run's inputs, outputs and variables.
pub fn remove_sensitive_data<S: AsRef<str>>(
    snapshot: &ExecutionSnapshot,
    sensitive_fields: &[S],
) -> ExecutionSnapshot {
    let needles: Vec<String> = sensitive_fields
        .iter()
        .map(|field| field.as_ref().to_lowercase())
        .collect();

    let mut sanitized = snapshot.clone();
    for node in sanitized.node_snapshots.values_mut() {
        sanitize_value(&mut node.inputs, &needles);
        sanitize_value(&mut node.outputs, &needles);
    }
    sanitize_value(&mut sanitized.inputs, &needles);
    sanitize_value(&mut sanitized.outputs, &needles);
    sanitize_value(&mut sanitized.variables, &needles);
    sanitized
}

fn sanitize_value(value: &mut Value, needles: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let key = key.to_lowercase();
                if needles.iter().any(|needle| key.contains(needle.as_str())) {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    sanitize_value(entry, needles);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize_value(item, needles);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::EngineError;
    use crate::model::ExecutionStatus;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn engine_state() -> WorkflowExecutionState {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut nodes = BTreeMap::new();

        let mut fetch = NodeExecutionState::new("fetch", NodeStatus::Completed);
        fetch.start_time = Some(t0 + Duration::seconds(2));
        fetch.duration = Some(300);
        fetch.outputs = Some(json!({"rows": 3}));
        nodes.insert("fetch".to_string(), fetch);

        let mut start = NodeExecutionState::new("start", NodeStatus::Completed);
        start.start_time = Some(t0);
        nodes.insert("start".to_string(), start);

        let mut summarize = NodeExecutionState::new("summarize", NodeStatus::Failed);
        summarize.start_time = Some(t0 + Duration::seconds(5));
        summarize.retry_count = Some(2);
        summarize.error = Some(EngineError {
            code: Some("E_LLM".into()),
            message: "rate limited".into(),
            node_id: None,
            details: None,
        });
        nodes.insert("summarize".to_string(), summarize);

        nodes.insert(
            "notify".to_string(),
            NodeExecutionState::new("notify", NodeStatus::Skipped),
        );

        WorkflowExecutionState {
            execution_id: "exec-42".into(),
            workflow_id: "wf-report".into(),
            status: ExecutionStatus::Failed,
            start_time: t0,
            end_time: Some(t0 + Duration::seconds(9)),
            duration: Some(9000),
            node_states: nodes,
            current_node_ids: vec!["summarize".into()],
            variables: json!({"apiKey": "sk-123", "region": "eu"}),
            error: Some(EngineError {
                code: None,
                message: "node summarize failed".into(),
                node_id: Some("summarize".into()),
                details: None,
            }),
        }
    }

    #[test]
    fn test_create_snapshot_from_execution() {
        let snapshot = create_snapshot_from_execution(&engine_state(), Some("Report".into()));

        assert_eq!(snapshot.execution_id, "exec-42");
        assert_eq!(snapshot.workflow_name.as_deref(), Some("Report"));
        assert_eq!(snapshot.status, ExecutionStatus::Failed);
        assert_eq!(snapshot.execution_order, vec!["start", "fetch", "summarize"]);
        assert_eq!(snapshot.current_node_id.as_deref(), Some("summarize"));
        assert_eq!(snapshot.node_snapshots["fetch"].outputs, json!({"rows": 3}));
        assert_eq!(snapshot.node_snapshots["notify"].inputs, json!({}));
        assert_eq!(
            snapshot.node_snapshots["summarize"]
                .metadata
                .as_ref()
                .and_then(|m| m.retry_count),
            Some(2)
        );
        assert_eq!(snapshot.error.as_ref().unwrap().node_id.as_deref(), Some("summarize"));
        assert!(!snapshot.metadata.compressed);
        assert!(summary_is_consistent(&snapshot));
        assert!(validate_snapshot(&snapshot).is_ok());
    }

    #[test]
    fn test_summary_counts_each_status() {
        let snapshot = create_snapshot_from_execution(&engine_state(), None);
        let summary = snapshot.summary;

        assert_eq!(summary.total_nodes, 4);
        assert_eq!(summary.completed_nodes, 2);
        assert_eq!(summary.failed_nodes, 1);
        assert_eq!(summary.skipped_nodes, 1);
        assert!(
            summary.completed_nodes + summary.failed_nodes + summary.skipped_nodes
                <= summary.total_nodes
        );
    }

    #[test]
    fn test_summary_sums_tokens() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "a".to_string(),
            NodeSnapshot::new("a", NodeStatus::Completed).with_tokens(100),
        );
        nodes.insert(
            "b".to_string(),
            NodeSnapshot::new("b", NodeStatus::Running).with_tokens(23),
        );
        nodes.insert("c".to_string(), NodeSnapshot::new("c", NodeStatus::Paused));

        let summary = calculate_summary(&nodes);
        assert_eq!(summary.total_tokens_used, 123);
        assert_eq!(summary.total_nodes, 3);
        assert_eq!(summary.completed_nodes, 1);
    }

    #[test]
    fn test_empty_node_map_summary() {
        let summary = calculate_summary(&BTreeMap::new());
        assert_eq!(summary, ExecutionSummary::default());
    }

    #[test]
    fn test_validate_snapshot_checks_ids_only() {
        let t0 = Utc::now();
        assert!(validate_snapshot(&ExecutionSnapshot::new("", "wf", t0)).is_err());
        assert!(validate_snapshot(&ExecutionSnapshot::new("e", " ", t0)).is_err());

        let mut snapshot = ExecutionSnapshot::new("e", "wf", t0);
        snapshot
            .node_snapshots
            .insert("n1".into(), NodeSnapshot::new("n2", NodeStatus::Completed));
        assert!(validate_snapshot(&snapshot).is_ok());
    }

    #[test]
    fn test_validate_import_payload() {
        let ok = json!({"executionId": "e", "workflowId": "w", "nodeSnapshots": {}});
        assert!(validate_import_payload(&ok).is_ok());

        let missing_nodes = json!({"executionId": "e", "workflowId": "w"});
        let err = validate_import_payload(&missing_nodes).unwrap_err();
        assert!(err.to_string().contains("nodeSnapshots"));

        let missing_id = json!({"workflowId": "w", "nodeSnapshots": {}});
        assert!(validate_import_payload(&missing_id)
            .unwrap_err()
            .to_string()
            .contains("executionId"));

        assert!(validate_import_payload(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_remove_sensitive_data() {
        let mut snapshot = create_snapshot_from_execution(&engine_state(), None);
        snapshot.node_snapshots.get_mut("fetch").unwrap().inputs = json!({
            "url": "https://example.test",
            "headers": {"Authorization": "Bearer abc", "accept": "json"},
            "items": [{"db_password": "hunter2", "id": 1}]
        });

        let sanitized = remove_sensitive_data(&snapshot, crate::config::DEFAULT_SENSITIVE_FIELDS);
        let inputs = &sanitized.node_snapshots["fetch"].inputs;

        assert_eq!(inputs["url"], "https://example.test");
        assert_eq!(inputs["headers"]["Authorization"], REDACTED);
        assert_eq!(inputs["headers"]["accept"], "json");
        assert_eq!(inputs["items"][0]["db_password"], REDACTED);
        assert_eq!(inputs["items"][0]["id"], 1);
        assert_eq!(sanitized.variables["apiKey"], REDACTED);
        assert_eq!(sanitized.variables["region"], "eu");

        // the source snapshot is left untouched
        assert_eq!(snapshot.variables["apiKey"], "sk-123");
    }
}
