/*!
# Rewind Core

Execution snapshot store for time-travel debugging of workflow runs.

This crate records the node-by-node state of each workflow execution so any
past run can be listed, inspected, compared and replayed without re-running
it. It provides:

- A snapshot data model with derived run summaries
- Four interchangeable backends: SQLite (indexed), flat key-value, a host
  procedure-call bridge, and in-memory
- Transparent gzip compression of payloads with integrity verification
- Filtered, sorted, paginated history queries and retention cleanup
- Export/import, change notifications, timelines and run diffs

## Architecture

The store follows hexagonal architecture principles:
- [`SnapshotStore`] is backend-agnostic; it talks to one [`SnapshotBackend`]
  chosen at initialization from the [`HostEnvironment`]
- Backends only persist and filter; sorting and paging live in the store
- The workflow engine is external; [`utils::create_snapshot_from_execution`]
  converts its state into a snapshot

## Usage

```rust
use rewind_core::{
    ExecutionSnapshot, HostEnvironment, NodeSnapshot, NodeStatus, SnapshotQuery,
    SnapshotStore, StoreConfig,
};

# #[tokio::main(flavor = "current_thread")]
# async fn main() -> rewind_core::Result<()> {
let store = SnapshotStore::new(StoreConfig::default(), HostEnvironment::new());

let snapshot = ExecutionSnapshot::new("exec-1", "wf-A", chrono::Utc::now())
    .with_node(NodeSnapshot::new("n1", NodeStatus::Completed))
    .with_node(NodeSnapshot::new("n2", NodeStatus::Running));
store.save_snapshot(&snapshot).await?;

store
    .update_node_snapshot("exec-1", "n2", NodeSnapshot::new("n2", NodeStatus::Completed))
    .await?;

let history = store.query_snapshots(&SnapshotQuery::new().workflow("wf-A")).await?;
assert_eq!(history[0].summary.completed_nodes, 2);
# Ok(())
# }
```
*/

pub mod backend;
pub mod compression;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod execution;
pub mod model;
pub mod observability;
pub mod query;
pub mod store;
pub mod timeline;
pub mod utils;

#[cfg(test)]
mod model_tests;

pub use backend::{HostBridge, HostEnvironment, KeyValueStore, SnapshotBackend};
pub use compression::{compress_snapshot, decompress_snapshot, CompressionAdapter, GzipCompressor, NoCompression};
pub use config::{BackendKind, BackendSelection, CleanupOptions, StoreConfig};
pub use diff::{compare_snapshots, NodeChange, NodeDiff, SnapshotDiff};
pub use error::{Result, StoreError};
pub use events::{StoreEvent, Subscription};
pub use execution::{NodeExecutionState, WorkflowExecutionState};
pub use model::{
    ExecutionSnapshot, ExecutionStatus, ExecutionSummary, NodeSnapshot, NodeStatus,
    SnapshotListItem, SnapshotMetadata,
};
pub use query::{SnapshotFilter, SnapshotQuery, SortField, SortOrder};
pub use store::{SnapshotStore, StoreState};
pub use timeline::{create_timeline_view, format_snapshot_as_text, TimelineStep, TimelineView};
