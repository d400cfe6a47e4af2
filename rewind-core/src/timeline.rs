/*!
Step-by-step views of a recorded run.
*/

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

use crate::model::{ExecutionSnapshot, ExecutionStatus, NodeSnapshot, NodeStatus};

/// One executed node, in execution order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineStep {
    pub index: usize,
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub node_icon: &'static str,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub description: String,
    pub is_selected: bool,
    pub has_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineView {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub steps: Vec<TimelineStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_step_index: Option<usize>,
}

/// Build the timeline of `snapshot`, marking step `selected` if given
///
/// Ids in `execution_order` with no matching node are skipped.
pub fn create_timeline_view(snapshot: &ExecutionSnapshot, selected: Option<usize>) -> TimelineView {
    let steps = snapshot
        .execution_order
        .iter()
        .filter_map(|node_id| snapshot.node_snapshots.get(node_id))
        .enumerate()
        .map(|(index, node)| TimelineStep {
            index,
            node_id: node.node_id.clone(),
            node_name: node.node_name.clone(),
            node_type: node.node_type.clone(),
            node_icon: node_icon(&node.node_type),
            status: node.status,
            started_at: node.started_at,
            completed_at: node.completed_at,
            duration_ms: node.duration_ms,
            description: step_description(node),
            is_selected: selected == Some(index),
            has_error: node.status == NodeStatus::Failed,
        })
        .collect();

    TimelineView {
        execution_id: snapshot.execution_id.clone(),
        status: snapshot.status,
        started_at: snapshot.started_at,
        completed_at: snapshot.completed_at,
        duration_ms: snapshot.duration_ms,
        steps,
        selected_step_index: selected,
    }
}

pub fn node_icon(node_type: &str) -> &'static str {
    match node_type {
        "start" => "▶️",
        "end" => "⏹️",
        "llm" => "🤖",
        "http" => "🌐",
        "template" => "📝",
        "condition" => "❓",
        "loop" => "🔄",
        "variable" => "📦",
        "code" => "💻",
        "delay" => "⏰",
        "webhook" => "🪝",
        _ => "⚙️",
    }
}

/// One-line summary of what a node did
pub fn step_description(node: &NodeSnapshot) -> String {
    if node.status == NodeStatus::Failed {
        if let Some(error) = &node.error {
            return format!("Error: {}", error.message);
        }
    }

    let metadata = node.metadata.clone().unwrap_or_default();
    match node.node_type.as_str() {
        "llm" => match &metadata.model {
            Some(model) => format!("Model: {model}, Tokens: {}", node.tokens_used()),
            None => "LLM Call".to_string(),
        },
        "http" => match metadata.http_status_code {
            Some(code) => format!(
                "HTTP {} - {code}",
                metadata.http_method.as_deref().unwrap_or("GET")
            ),
            None => "HTTP Request".to_string(),
        },
        "condition" => match &metadata.condition_branch {
            Some(branch) => format!("Branch: {branch}"),
            None => "Condition check".to_string(),
        },
        "loop" => match metadata.loop_iterations {
            Some(total) => format!(
                "Iteration: {}/{total}",
                metadata.current_iteration.unwrap_or(0)
            ),
            None => "Loop".to_string(),
        },
        _ => node.node_name.clone(),
    }
}

/// Plain-text report of a run
pub fn format_snapshot_as_text(snapshot: &ExecutionSnapshot) -> String {
    let mut out = String::new();
    let workflow = snapshot
        .workflow_name
        .as_deref()
        .unwrap_or(&snapshot.workflow_id);

    // Writing to a String cannot fail.
    let _ = writeln!(out, "Execution Snapshot: {}", snapshot.execution_id);
    let _ = writeln!(out, "Workflow: {workflow}");
    let _ = writeln!(out, "Status: {}", snapshot.status);
    let _ = writeln!(out, "Start Time: {}", snapshot.started_at.to_rfc3339());
    let _ = writeln!(
        out,
        "Completion Time: {}",
        snapshot
            .completed_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "In Progress".to_string())
    );
    let _ = writeln!(
        out,
        "Duration: {}",
        snapshot
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "N/A".to_string())
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Node Execution Details:");
    let _ = writeln!(out, "---");

    for node in snapshot
        .execution_order
        .iter()
        .filter_map(|id| snapshot.node_snapshots.get(id))
    {
        let _ = writeln!(out, "[{}] {} ({})", node.status, node.node_name, node.node_type);
        let _ = writeln!(out, "  Duration: {}ms", node.duration_ms);
        if let Some(error) = &node.error {
            let _ = writeln!(out, "  Error: {}", error.message);
        }
        let _ = writeln!(out);
    }

    let summary = &snapshot.summary;
    let _ = writeln!(out, "---");
    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  Total Nodes: {}", summary.total_nodes);
    let _ = writeln!(out, "  Completed: {}", summary.completed_nodes);
    let _ = writeln!(out, "  Failed: {}", summary.failed_nodes);
    let _ = write!(out, "  Skipped: {}", summary.skipped_nodes);
    if summary.total_tokens_used > 0 {
        let _ = write!(out, "\n  Token Usage: {}", summary.total_tokens_used);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeError, NodeMetadata};
    use chrono::TimeZone;

    fn run() -> ExecutionSnapshot {
        let t0 = Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap();
        let mut llm = NodeSnapshot::new("ask", NodeStatus::Completed)
            .with_type("llm")
            .with_started_at(t0);
        llm.metadata = Some(NodeMetadata {
            model: Some("gpt-4o".into()),
            tokens_used: Some(120),
            ..NodeMetadata::default()
        });

        let mut http = NodeSnapshot::new("post", NodeStatus::Failed).with_type("http");
        http.error = Some(NodeError {
            code: None,
            message: "connection reset".into(),
            details: None,
        });

        let mut snapshot = ExecutionSnapshot::new("exec-9", "wf-T", t0)
            .with_name("Triage")
            .with_status(ExecutionStatus::Failed)
            .with_duration(1800)
            .with_node(llm)
            .with_node(http)
            .with_node(NodeSnapshot::new("unused", NodeStatus::Skipped));
        snapshot.execution_order = vec!["ask".into(), "post".into(), "ghost".into()];
        snapshot
    }

    #[test]
    fn test_timeline_steps_follow_execution_order() {
        let view = create_timeline_view(&run(), Some(1));

        assert_eq!(view.steps.len(), 2);
        assert_eq!(view.steps[0].node_icon, "🤖");
        assert_eq!(view.steps[0].description, "Model: gpt-4o, Tokens: 120");
        assert!(!view.steps[0].is_selected);

        assert!(view.steps[1].is_selected);
        assert!(view.steps[1].has_error);
        assert_eq!(view.steps[1].description, "Error: connection reset");
        assert_eq!(view.selected_step_index, Some(1));
    }

    #[test]
    fn test_step_descriptions_by_type() {
        let mut http = NodeSnapshot::new("h", NodeStatus::Completed).with_type("http");
        assert_eq!(step_description(&http), "HTTP Request");
        http.metadata = Some(NodeMetadata {
            http_status_code: Some(201),
            http_method: Some("POST".into()),
            ..NodeMetadata::default()
        });
        assert_eq!(step_description(&http), "HTTP POST - 201");

        let mut cond = NodeSnapshot::new("c", NodeStatus::Completed).with_type("condition");
        cond.metadata = Some(NodeMetadata {
            condition_branch: Some("else".into()),
            ..NodeMetadata::default()
        });
        assert_eq!(step_description(&cond), "Branch: else");

        let mut looped = NodeSnapshot::new("l", NodeStatus::Running).with_type("loop");
        looped.metadata = Some(NodeMetadata {
            loop_iterations: Some(5),
            current_iteration: Some(2),
            ..NodeMetadata::default()
        });
        assert_eq!(step_description(&looped), "Iteration: 2/5");

        let plain = NodeSnapshot::new("Send digest", NodeStatus::Completed).with_type("email");
        assert_eq!(step_description(&plain), "Send digest");
        assert_eq!(node_icon("email"), "⚙️");
    }

    #[test]
    fn test_text_report() {
        let text = format_snapshot_as_text(&run());

        assert!(text.starts_with("Execution Snapshot: exec-9\nWorkflow: Triage\nStatus: failed"));
        assert!(text.contains("Duration: 1800ms"));
        assert!(text.contains("Completion Time: In Progress"));
        assert!(text.contains("[failed] post (http)\n  Duration: 0ms\n  Error: connection reset"));
        assert!(!text.contains("unused"));
        assert!(text.contains("  Skipped: 1"));
        assert!(text.ends_with("  Token Usage: 120"));
    }
}
