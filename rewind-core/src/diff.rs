/*!
Node-level comparison of two runs.
*/

use serde::Serialize;
use std::collections::BTreeSet;

use crate::model::{ExecutionSnapshot, NodeSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeChange {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDiff {
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: NodeChange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_a: Option<NodeSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_b: Option<NodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub execution_id_a: String,
    pub execution_id_b: String,
    pub status_changed: bool,
    /// `b.duration_ms - a.duration_ms`, missing durations counting as zero
    pub duration_diff: i64,
    pub node_changes: Vec<NodeDiff>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        !self.status_changed && self.duration_diff == 0 && self.node_changes.is_empty()
    }
}

/// Compare `a` to `b`; a node counts as changed when its status or outputs differ
///
/// Node changes are listed in node id order.
pub fn compare_snapshots(a: &ExecutionSnapshot, b: &ExecutionSnapshot) -> SnapshotDiff {
    let node_ids: BTreeSet<&String> = a
        .node_snapshots
        .keys()
        .chain(b.node_snapshots.keys())
        .collect();

    let node_changes = node_ids
        .into_iter()
        .filter_map(|node_id| {
            let node_a = a.node_snapshots.get(node_id);
            let node_b = b.node_snapshots.get(node_id);
            let kind = match (node_a, node_b) {
                (None, Some(_)) => NodeChange::Added,
                (Some(_), None) => NodeChange::Removed,
                (Some(x), Some(y)) if x.status != y.status || x.outputs != y.outputs => {
                    NodeChange::Changed
                }
                _ => return None,
            };
            Some(NodeDiff {
                node_id: node_id.clone(),
                kind,
                node_a: node_a.cloned(),
                node_b: node_b.cloned(),
            })
        })
        .collect();

    SnapshotDiff {
        execution_id_a: a.execution_id.clone(),
        execution_id_b: b.execution_id.clone(),
        status_changed: a.status != b.status,
        duration_diff: b.duration_ms.unwrap_or(0) - a.duration_ms.unwrap_or(0),
        node_changes,
    }
}
