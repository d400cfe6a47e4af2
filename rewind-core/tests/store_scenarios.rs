/*!
Store behavior exercised against every backend.

Each test builds one store per backend (memory, JSON files on disk, SQLite,
and a host bridge looped back onto a memory backend) and checks the same
observable behavior on all of them.
*/

use chrono::{DateTime, Duration, Utc};
use rewind_core::backend::bridge::LoopbackBridge;
use rewind_core::backend::{FileKeyValueStore, MemoryBackend};
use rewind_core::{
    BackendKind, CleanupOptions, ExecutionSnapshot, ExecutionStatus, HostEnvironment,
    NodeSnapshot, NodeStatus, SnapshotQuery, SnapshotStore, SortField, SortOrder, StoreConfig,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    name: &'static str,
    store: SnapshotStore,
    dir: Option<TempDir>,
}

fn fixtures(config: StoreConfig) -> Vec<Fixture> {
    let mut fixtures = vec![Fixture {
        name: "memory",
        store: SnapshotStore::new(config.clone().with_backend(BackendKind::Memory), HostEnvironment::new()),
        dir: None,
    }];

    let kv_dir = TempDir::new().unwrap();
    let environment =
        HostEnvironment::new().with_key_value(Arc::new(FileKeyValueStore::new(kv_dir.path())));
    fixtures.push(Fixture {
        name: "key-value",
        store: SnapshotStore::new(config.clone().with_backend(BackendKind::KeyValue), environment),
        dir: Some(kv_dir),
    });

    #[cfg(feature = "indexed")]
    {
        let db_dir = TempDir::new().unwrap();
        let environment = HostEnvironment::new().with_database_dir(db_dir.path());
        fixtures.push(Fixture {
            name: "indexed",
            store: SnapshotStore::new(config.clone().with_backend(BackendKind::Indexed), environment),
            dir: Some(db_dir),
        });
    }

    let environment =
        HostEnvironment::new().with_bridge(Arc::new(LoopbackBridge::new(MemoryBackend::new())));
    fixtures.push(Fixture {
        name: "bridge",
        store: SnapshotStore::new(config.with_backend(BackendKind::Bridge), environment),
        dir: None,
    });

    fixtures
}

fn report_run(id: &str, workflow: &str, started_at: DateTime<Utc>) -> ExecutionSnapshot {
    let mut snapshot = ExecutionSnapshot::new(id, workflow, started_at)
        .with_name("Nightly report")
        .with_status(ExecutionStatus::Completed)
        .with_duration(1200)
        .with_node(
            NodeSnapshot::new("fetch", NodeStatus::Completed)
                .with_type("http")
                .with_started_at(started_at)
                .with_io(json!({"url": "https://example.org/rows"}), json!({"rows": [1, 2, 3]})),
        )
        .with_node(
            NodeSnapshot::new("summarize", NodeStatus::Completed)
                .with_type("llm")
                .with_tokens(420)
                .with_io(json!({"prompt": "Summarize"}), json!({"text": "Three rows."})),
        );
    snapshot.completed_at = Some(started_at + Duration::milliseconds(1200));
    snapshot.execution_order = vec!["fetch".into(), "summarize".into()];
    snapshot.variables = json!({"region": "eu-west"});
    snapshot
}

// Non-integer floats whose shortest decimal form needs all 17 digits
fn with_scores(mut snapshot: ExecutionSnapshot) -> ExecutionSnapshot {
    let samples: Vec<f64> = (1..40u32)
        .map(|i| 1000.0 * (f64::from(i) * 0.618_033_988_75).fract())
        .collect();
    snapshot = snapshot.with_node(
        NodeSnapshot::new("score", NodeStatus::Completed)
            .with_type("code")
            .with_io(
                json!({"threshold": 0.1 + 0.2}),
                json!({"score": 989.9951327998887, "samples": samples}),
            ),
    );
    snapshot.variables = json!({"region": "eu-west", "ratio": 2.0_f64.sqrt()});
    snapshot
}

#[tokio::test]
async fn test_round_trip_on_every_backend() {
    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        store.initialize().await.unwrap();
        assert_eq!(store.backend_kind().await.map(|k| k.as_str()), Some(fixture.name));

        let snapshot = with_scores(report_run("exec-rt", "wf-A", Utc::now()));
        store.save_snapshot(&snapshot).await.unwrap();

        let loaded = store.get_snapshot("exec-rt").await.unwrap();
        assert_eq!(loaded.as_ref(), Some(&snapshot), "backend {}", fixture.name);
        assert!(store.get_snapshot("never-saved").await.unwrap().is_none());

        let node = store.get_node_snapshot("exec-rt", "summarize").await.unwrap().unwrap();
        assert_eq!(node.tokens_used(), 420);

        store.destroy().await.unwrap();
    }
}

#[tokio::test]
async fn test_compression_is_transparent_on_every_backend() {
    for fixture in fixtures(StoreConfig::default().with_compression(9)) {
        let store = &fixture.store;
        let snapshot = with_scores(report_run("exec-gz", "wf-A", Utc::now()));
        store.save_snapshot(&snapshot).await.unwrap();

        let loaded = store.get_snapshot("exec-gz").await.unwrap().unwrap();
        assert!(!loaded.metadata.compressed, "backend {}", fixture.name);
        assert!(loaded.metadata.compression.is_none());
        assert_eq!(loaded, snapshot, "backend {}", fixture.name);

        let exported = store.export_snapshot("exec-gz").await.unwrap();
        assert!(!exported.contains("contentHash"));
        assert!(exported.contains("\"rows\""));

        if fixture.name == "key-value" {
            let dir = fixture.dir.as_ref().unwrap();
            let raw = std::fs::read_to_string(dir.path().join("snapshots").join("exec-gz.json"))
                .unwrap();
            let stored: ExecutionSnapshot = serde_json::from_str(&raw).unwrap();
            assert!(stored.metadata.compressed);
            assert!(stored.node_snapshots["fetch"].outputs.is_string());
        }
    }
}

#[tokio::test]
async fn test_upsert_does_not_duplicate() {
    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        let snapshot = report_run("exec-up", "wf-A", Utc::now());
        store.save_snapshot(&snapshot).await.unwrap();
        store.save_snapshot(&snapshot).await.unwrap();

        assert_eq!(store.get_snapshot_count(None).await.unwrap(), 1, "backend {}", fixture.name);
        let items = store.query_snapshots(&SnapshotQuery::new()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(store.get_snapshot("exec-up").await.unwrap(), Some(snapshot));
    }
}

#[tokio::test]
async fn test_summary_derivation_for_mixed_statuses() {
    let statuses = [
        NodeStatus::Completed,
        NodeStatus::Failed,
        NodeStatus::Skipped,
        NodeStatus::Running,
        NodeStatus::Pending,
        NodeStatus::Paused,
        NodeStatus::Completed,
    ];

    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        let mut snapshot = ExecutionSnapshot::new("exec-mix", "wf-A", Utc::now());
        for (i, status) in statuses.iter().enumerate() {
            snapshot = snapshot.with_node(NodeSnapshot::new(format!("n{i}"), *status));
        }
        store.save_snapshot(&snapshot).await.unwrap();

        store
            .update_node_snapshot(
                "exec-mix",
                "n3",
                NodeSnapshot::new("n3", NodeStatus::Failed).with_tokens(12),
            )
            .await
            .unwrap();

        let summary = store.get_snapshot("exec-mix").await.unwrap().unwrap().summary;
        assert_eq!(summary.total_nodes, statuses.len(), "backend {}", fixture.name);
        assert_eq!(summary.completed_nodes, 2);
        assert_eq!(summary.failed_nodes, 2);
        assert_eq!(summary.skipped_nodes, 1);
        assert_eq!(summary.total_tokens_used, 12);
        assert!(
            summary.completed_nodes + summary.failed_nodes + summary.skipped_nodes
                <= summary.total_nodes
        );
    }
}

#[tokio::test]
async fn test_node_update_scenario() {
    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        let snapshot = ExecutionSnapshot::new("exec-1", "wf-A", Utc::now())
            .with_status(ExecutionStatus::Running)
            .with_node(NodeSnapshot::new("n1", NodeStatus::Completed))
            .with_node(NodeSnapshot::new("n2", NodeStatus::Running));
        store.save_snapshot(&snapshot).await.unwrap();

        store
            .update_node_snapshot("exec-1", "n2", NodeSnapshot::new("n2", NodeStatus::Completed))
            .await
            .unwrap();

        let summary = store.get_snapshot("exec-1").await.unwrap().unwrap().summary;
        assert_eq!(summary.total_nodes, 2, "backend {}", fixture.name);
        assert_eq!(summary.completed_nodes, 2);
        assert_eq!(summary.failed_nodes, 0);
        assert_eq!(summary.skipped_nodes, 0);

        let err = store
            .update_node_snapshot("exec-404", "n1", NodeSnapshot::new("n1", NodeStatus::Completed))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

#[tokio::test]
async fn test_concurrent_node_updates_are_all_kept() {
    for fixture in fixtures(StoreConfig::default()) {
        let store = Arc::new(fixture.store);
        store
            .save_snapshot(&ExecutionSnapshot::new("exec-par", "wf-A", Utc::now()))
            .await
            .unwrap();

        let updates = (0..8).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let node_id = format!("node-{i}");
                store
                    .update_node_snapshot("exec-par", &node_id, NodeSnapshot::new(&node_id, NodeStatus::Completed))
                    .await
            })
        });
        for update in futures::future::join_all(updates).await {
            update.unwrap().unwrap();
        }

        let snapshot = store.get_snapshot("exec-par").await.unwrap().unwrap();
        assert_eq!(snapshot.node_snapshots.len(), 8, "backend {}", fixture.name);
        assert_eq!(snapshot.summary.completed_nodes, 8);
    }
}

#[tokio::test]
async fn test_export_import_into_empty_store() {
    for fixture in fixtures(StoreConfig::default()) {
        let source = &fixture.store;
        let original = report_run("exec-1", "wf-A", Utc::now());
        source.save_snapshot(&original).await.unwrap();
        let before = source.get_snapshot("exec-1").await.unwrap().unwrap();

        let text = source.export_snapshot("exec-1").await.unwrap();

        let target = SnapshotStore::in_memory();
        let imported = target.import_snapshot(&text).await.unwrap();
        assert_eq!(imported, before, "backend {}", fixture.name);
        assert_eq!(target.get_snapshot("exec-1").await.unwrap(), Some(before));

        // Same text back into the source store is an upsert.
        source.import_snapshot(&text).await.unwrap();
        assert_eq!(source.get_snapshot_count(None).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_import_rejects_incomplete_payload_before_writing() {
    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        let err = store
            .import_snapshot(r#"{"executionId": "exec-bad", "nodeSnapshots": {}}"#)
            .await
            .unwrap_err();
        assert!(err.is_validation(), "backend {}", fixture.name);
        assert_eq!(store.get_snapshot_count(None).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_delete_missing_id_is_harmless() {
    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        store.save_snapshot(&report_run("exec-keep", "wf-A", Utc::now())).await.unwrap();

        let before = store.get_snapshot_count(None).await.unwrap();
        store.delete_snapshot("missing-id").await.unwrap();
        assert_eq!(store.get_snapshot_count(None).await.unwrap(), before, "backend {}", fixture.name);

        store.delete_snapshot("exec-keep").await.unwrap();
        assert!(store.get_snapshot("exec-keep").await.unwrap().is_none());
        assert_eq!(store.get_snapshot_count(None).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_pagination_and_filters() {
    let now = Utc::now();

    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        for i in 0..25 {
            let workflow = if i % 5 == 0 { "wf-B" } else { "wf-A" };
            let mut snapshot = report_run(&format!("exec-{i:02}"), workflow, now - Duration::minutes(i));
            if i % 2 == 1 {
                snapshot.status = ExecutionStatus::Failed;
            }
            store.save_snapshot(&snapshot).await.unwrap();
        }

        let page_two = store
            .query_snapshots(&SnapshotQuery::new().page(2, 10))
            .await
            .unwrap();
        let ids: Vec<&str> = page_two.iter().map(|item| item.execution_id.as_str()).collect();
        let expected: Vec<String> = (10..20).map(|i| format!("exec-{i:02}")).collect();
        assert_eq!(ids, expected, "backend {}", fixture.name);

        let beyond = store
            .query_snapshots(&SnapshotQuery::new().page(4, 10))
            .await
            .unwrap();
        assert!(beyond.is_empty());

        let ascending = store
            .query_snapshots(
                &SnapshotQuery::new()
                    .workflow("wf-B")
                    .sort(SortField::StartedAt, SortOrder::Asc),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = ascending.iter().map(|item| item.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["exec-20", "exec-15", "exec-10", "exec-05", "exec-00"]);

        let failed = store
            .query_snapshots(&SnapshotQuery::new().workflow("wf-A").status(ExecutionStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 10);

        let window = store
            .query_snapshots(
                &SnapshotQuery::new().between(Some(now - Duration::minutes(4)), Some(now - Duration::minutes(2))),
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 3);

        assert_eq!(store.get_snapshot_count(Some("wf-B")).await.unwrap(), 5);
        assert_eq!(store.get_snapshot_count(None).await.unwrap(), 25);
    }
}

#[tokio::test]
async fn test_age_retention() {
    let now = Utc::now();

    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        for day in 0..45 {
            let started_at = now - Duration::days(day) - Duration::hours(1);
            store
                .save_snapshot(&report_run(&format!("day-{day:02}"), "wf-A", started_at))
                .await
                .unwrap();
        }

        let removed = store
            .cleanup_snapshots(Some(CleanupOptions::default().max_age_days(30).max_snapshots(0)))
            .await
            .unwrap();
        assert_eq!(removed, 15, "backend {}", fixture.name);

        let remaining: HashSet<String> = store
            .query_snapshots(&SnapshotQuery::new().page(1, 100))
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.execution_id)
            .collect();
        let expected: HashSet<String> = (0..30).map(|day| format!("day-{day:02}")).collect();
        assert_eq!(remaining, expected);
    }
}

#[tokio::test]
async fn test_count_retention() {
    let now = Utc::now();

    for fixture in fixtures(StoreConfig::default()) {
        let store = &fixture.store;
        for i in 0..150 {
            let started_at = now - Duration::minutes(i);
            store
                .save_snapshot(&report_run(&format!("run-{i:03}"), "wf-A", started_at))
                .await
                .unwrap();
        }

        let removed = store
            .cleanup_snapshots(Some(CleanupOptions::default().max_age_days(30).max_snapshots(100)))
            .await
            .unwrap();
        assert_eq!(removed, 50, "backend {}", fixture.name);
        assert_eq!(store.get_snapshot_count(None).await.unwrap(), 100);

        for i in [0, 99] {
            assert!(store.get_snapshot(&format!("run-{i:03}")).await.unwrap().is_some());
        }
        for i in [100, 149] {
            assert!(store.get_snapshot(&format!("run-{i:03}")).await.unwrap().is_none());
        }
    }
}
