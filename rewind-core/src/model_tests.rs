/*!
Tests for the snapshot data model, including serialization edge cases.
*/

#[cfg(test)]
mod tests {
    use crate::model::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn started() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_snapshot_creation() {
        let snapshot = ExecutionSnapshot::new("exec-1", "wf-A", started())
            .with_name("Nightly import")
            .with_node(NodeSnapshot::new("n1", NodeStatus::Completed).with_tokens(12))
            .with_node(NodeSnapshot::new("n2", NodeStatus::Running));

        assert_eq!(snapshot.execution_id, "exec-1");
        assert_eq!(snapshot.status, ExecutionStatus::Running);
        assert_eq!(snapshot.summary.total_nodes, 2);
        assert_eq!(snapshot.summary.completed_nodes, 1);
        assert_eq!(snapshot.summary.total_tokens_used, 12);
        assert!(!snapshot.is_compressed());
        assert_eq!(snapshot.metadata.version, SNAPSHOT_FORMAT_VERSION);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let snapshot = ExecutionSnapshot::new("exec-1", "wf-A", started())
            .with_node(NodeSnapshot::new("n1", NodeStatus::Skipped));
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["executionId"], "exec-1");
        assert_eq!(value["workflowId"], "wf-A");
        assert_eq!(value["status"], "running");
        assert_eq!(value["nodeSnapshots"]["n1"]["status"], "skipped");
        assert_eq!(value["summary"]["skippedNodes"], 1);
        assert_eq!(value["metadata"]["compressed"], false);
        assert!(value["metadata"].get("compression").is_none());
    }

    #[test]
    fn test_serialization_roundtrip_preserves_everything() {
        let mut snapshot = ExecutionSnapshot::new("exec-1", "wf-A", started())
            .with_status(ExecutionStatus::Failed)
            .with_duration(1532)
            .with_node(
                NodeSnapshot::new("llm-1", NodeStatus::Failed)
                    .with_type("llm")
                    .with_io(json!({"prompt": "hi"}), json!(null))
                    .with_started_at(started()),
            );
        snapshot.error = Some(SnapshotError {
            code: Some("E_TIMEOUT".into()),
            message: "model timed out".into(),
            node_id: Some("llm-1".into()),
        });
        snapshot.variables = json!({"region": "eu", "retries": [1, 2]});

        let text = serde_json::to_string(&snapshot).unwrap();
        let back: ExecutionSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_minimal_node_json_uses_defaults() {
        let node: NodeSnapshot =
            serde_json::from_value(json!({"nodeId": "n2", "status": "completed"})).unwrap();
        assert_eq!(node.status, NodeStatus::Completed);
        assert_eq!(node.duration_ms, 0);
        assert!(node.inputs.is_null());
        assert_eq!(node.tokens_used(), 0);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result: Result<NodeSnapshot, _> =
            serde_json::from_value(json!({"nodeId": "n", "status": "exploded"}));
        assert!(result.is_err());

        assert!("exploded".parse::<ExecutionStatus>().is_err());
        assert_eq!(
            "cancelled".parse::<ExecutionStatus>().unwrap(),
            ExecutionStatus::Cancelled
        );
    }

    #[test]
    fn test_list_item_projection() {
        let snapshot = ExecutionSnapshot::new("exec-7", "wf-B", started())
            .with_name("Report")
            .with_duration(99)
            .with_node(NodeSnapshot::new("n1", NodeStatus::Completed));
        let item = snapshot.to_list_item();

        assert_eq!(item.execution_id, "exec-7");
        assert_eq!(item.workflow_name.as_deref(), Some("Report"));
        assert_eq!(item.duration_ms, Some(99));
        assert_eq!(item.summary, snapshot.summary);

        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("nodeSnapshots").is_none());
    }

    #[test]
    fn test_special_characters_in_ids() {
        let id = "exec/with:odd chars-✓";
        let snapshot = ExecutionSnapshot::new(id, "wf", started());
        let text = serde_json::to_string(&snapshot).unwrap();
        let back: ExecutionSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back.execution_id, id);
    }
}
