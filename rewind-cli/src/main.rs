/*!
Rewind CLI - Command-line interface for the execution snapshot store.

This CLI inspects, exports, compares and prunes the recorded workflow runs
kept in a local snapshot directory (SQLite database or flat JSON files).
*/

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rewind_core::backend::FileKeyValueStore;
use rewind_core::observability::init_observability_with;
use rewind_core::query::DEFAULT_PAGE_SIZE;
use rewind_core::{
    compare_snapshots, create_timeline_view, format_snapshot_as_text, BackendKind, CleanupOptions,
    ExecutionSnapshot, ExecutionStatus, HostEnvironment, SnapshotListItem, SnapshotQuery,
    SnapshotStore, SortField, SortOrder, StoreConfig,
};
use rewind_retry::{local_storage_backoff_policy, retry_on_transient};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "CLI for the Rewind execution snapshot store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Storage backend to use
    #[arg(short, long, global = true, value_enum, default_value = "auto")]
    backend: BackendType,

    /// Snapshot directory (database file and key-value records)
    #[arg(
        short,
        long,
        global = true,
        env = "REWIND_DATA_DIR",
        default_value = "./snapshots"
    )]
    data_dir: PathBuf,

    /// Store configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Compress snapshots written by this invocation
    #[arg(long, global = true)]
    compress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendType {
    Auto,
    Indexed,
    KeyValue,
    /// Nothing persists past this invocation
    Memory,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortKey {
    Started,
    Duration,
    Status,
}

#[derive(Subcommand)]
enum Commands {
    /// List recorded executions, newest first
    List {
        /// Only executions of this workflow
        #[arg(short, long)]
        workflow: Option<String>,
        /// Only executions with this status
        #[arg(short, long, value_parser = parse_status)]
        status: Option<ExecutionStatus>,
        /// Started at or after (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        since: Option<DateTime<Utc>>,
        /// Started at or before (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        until: Option<DateTime<Utc>>,
        /// Sort field
        #[arg(long, value_enum, default_value = "started")]
        sort: SortKey,
        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: usize,
        /// Items per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one execution
    Show {
        execution_id: String,
        /// Show only this node
        #[arg(short, long)]
        node: Option<String>,
        /// Print JSON instead of the text report
        #[arg(long)]
        json: bool,
    },
    /// Count stored executions
    Count {
        #[arg(short, long)]
        workflow: Option<String>,
    },
    /// Export one execution as JSON
    Export {
        execution_id: String,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import an exported execution
    Import {
        /// Exported JSON file
        file: PathBuf,
    },
    /// Delete executions
    Delete {
        #[arg(required = true)]
        execution_ids: Vec<String>,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Remove executions beyond the retention limits
    Cleanup {
        /// Maximum age in days (0 disables the age rule)
        #[arg(long)]
        max_age_days: Option<u32>,
        /// Maximum number kept (0 disables the count rule)
        #[arg(long)]
        max_snapshots: Option<usize>,
    },
    /// Compare two executions node by node
    Diff {
        execution_a: String,
        execution_b: String,
        #[arg(long)]
        json: bool,
    },
    /// Step-by-step timeline of one execution
    Timeline {
        execution_id: String,
        /// Highlight this step (0-based)
        #[arg(long)]
        step: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Execution ID")]
    execution_id: String,
    #[tabled(rename = "Workflow")]
    workflow: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Nodes")]
    nodes: String,
    #[tabled(rename = "Failed")]
    failed: usize,
}

impl From<SnapshotListItem> for SnapshotRow {
    fn from(item: SnapshotListItem) -> Self {
        Self {
            execution_id: item.execution_id,
            workflow: item.workflow_name.unwrap_or(item.workflow_id),
            status: item.status.to_string(),
            started: format_timestamp(item.started_at),
            duration: format_duration(item.duration_ms),
            nodes: format!("{}/{}", item.summary.completed_nodes, item.summary.total_nodes),
            failed: item.summary.failed_nodes,
        }
    }
}

#[derive(Tabled)]
struct NodeChangeRow {
    #[tabled(rename = "Node")]
    node_id: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Before")]
    before: String,
    #[tabled(rename = "After")]
    after: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    let directive = if cli.verbose { "rewind=debug" } else { "rewind=info" };
    init_observability_with(directive, cli.json_logs)?;

    let store = open_store(&cli).await?;

    let outcome = run(&store, cli.command).await;
    store.destroy().await?;
    outcome
}

async fn open_store(cli: &Cli) -> Result<SnapshotStore, anyhow::Error> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::default(),
    };
    if cli.compress && !config.compress {
        let level = config.compression_level;
        config = config.with_compression(level);
    }
    config.debug |= cli.verbose;
    config = match cli.backend {
        BackendType::Auto => config,
        BackendType::Indexed => config.with_backend(BackendKind::Indexed),
        BackendType::KeyValue => config.with_backend(BackendKind::KeyValue),
        BackendType::Memory => config.with_backend(BackendKind::Memory),
    };

    let environment = HostEnvironment::new()
        .with_database_dir(cli.data_dir.clone())
        .with_key_value(Arc::new(FileKeyValueStore::new(&cli.data_dir)));

    let store = SnapshotStore::new(config, environment);
    store
        .initialize()
        .await
        .with_context(|| format!("Failed to open snapshot store in {}", cli.data_dir.display()))?;
    let backend = store.backend_kind().await;
    info!(backend = ?backend, data_dir = %cli.data_dir.display(), "Snapshot store ready");
    Ok(store)
}

async fn run(store: &SnapshotStore, command: Commands) -> Result<(), anyhow::Error> {
    match command {
        Commands::List {
            workflow,
            status,
            since,
            until,
            sort,
            asc,
            page,
            page_size,
            json,
        } => {
            let mut query = SnapshotQuery::new().between(since, until).page(page, page_size);
            if let Some(workflow) = workflow {
                query = query.workflow(workflow);
            }
            if let Some(status) = status {
                query = query.status(status);
            }
            let field = match sort {
                SortKey::Started => SortField::StartedAt,
                SortKey::Duration => SortField::DurationMs,
                SortKey::Status => SortField::Status,
            };
            let order = if asc { SortOrder::Asc } else { SortOrder::Desc };
            list_snapshots(store, &query.sort(field, order), json).await
        }
        Commands::Show {
            execution_id,
            node,
            json,
        } => show_snapshot(store, &execution_id, node.as_deref(), json).await,
        Commands::Count { workflow } => {
            let count = store.get_snapshot_count(workflow.as_deref()).await?;
            println!("{count}");
            Ok(())
        }
        Commands::Export {
            execution_id,
            output,
        } => export_snapshot(store, &execution_id, output).await,
        Commands::Import { file } => import_snapshot(store, file).await,
        Commands::Delete {
            execution_ids,
            force,
        } => delete_snapshots(store, &execution_ids, force).await,
        Commands::Cleanup {
            max_age_days,
            max_snapshots,
        } => {
            let options = CleanupOptions {
                max_age_days,
                max_snapshots,
            };
            let removed = store.cleanup_snapshots(Some(options)).await?;
            println!("✓ Removed {removed} snapshot(s)");
            Ok(())
        }
        Commands::Diff {
            execution_a,
            execution_b,
            json,
        } => diff_snapshots(store, &execution_a, &execution_b, json).await,
        Commands::Timeline {
            execution_id,
            step,
            json,
        } => show_timeline(store, &execution_id, step, json).await,
    }
}

async fn list_snapshots(
    store: &SnapshotStore,
    query: &SnapshotQuery,
    json: bool,
) -> Result<(), anyhow::Error> {
    let items = store.query_snapshots(query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No snapshots found");
        return Ok(());
    }

    let total = store.get_snapshot_count(query.workflow_id.as_deref()).await?;
    let rows: Vec<SnapshotRow> = items.into_iter().map(SnapshotRow::from).collect();
    let shown = rows.len();
    println!("{}", Table::new(rows));
    println!(
        "Page {} ({shown} shown, {total} stored)",
        query.effective_page()
    );
    Ok(())
}

async fn show_snapshot(
    store: &SnapshotStore,
    execution_id: &str,
    node_id: Option<&str>,
    json: bool,
) -> Result<(), anyhow::Error> {
    if let Some(node_id) = node_id {
        let node = store
            .get_node_snapshot(execution_id, node_id)
            .await?
            .with_context(|| format!("Node '{node_id}' not found in execution '{execution_id}'"))?;
        println!("{}", serde_json::to_string_pretty(&node)?);
        return Ok(());
    }

    let snapshot = load(store, execution_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", format_snapshot_as_text(&snapshot));
    }
    Ok(())
}

async fn export_snapshot(
    store: &SnapshotStore,
    execution_id: &str,
    output: Option<PathBuf>,
) -> Result<(), anyhow::Error> {
    let json = store.export_snapshot(execution_id).await?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Exported '{execution_id}' to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn import_snapshot(store: &SnapshotStore, file: PathBuf) -> Result<(), anyhow::Error> {
    let json = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let json = json.as_str();
    let snapshot = retry_on_transient("import_snapshot", local_storage_backoff_policy(), move |_| {
        store.import_snapshot(json)
    })
    .await?;

    println!(
        "✓ Imported '{}' ({} nodes)",
        snapshot.execution_id, snapshot.summary.total_nodes
    );
    Ok(())
}

async fn delete_snapshots(
    store: &SnapshotStore,
    execution_ids: &[String],
    force: bool,
) -> Result<(), anyhow::Error> {
    if !force {
        print!(
            "Are you sure you want to delete {} snapshot(s)? (y/N): ",
            execution_ids.len()
        );
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    for execution_id in execution_ids {
        if store.get_snapshot(execution_id).await?.is_none() {
            warn!(execution_id = %execution_id, "Snapshot not found, skipping");
            continue;
        }
        store.delete_snapshot(execution_id).await?;
        println!("✓ Deleted '{execution_id}'");
    }
    Ok(())
}

async fn diff_snapshots(
    store: &SnapshotStore,
    execution_a: &str,
    execution_b: &str,
    json: bool,
) -> Result<(), anyhow::Error> {
    let a = load(store, execution_a).await?;
    let b = load(store, execution_b).await?;
    let diff = compare_snapshots(&a, &b);

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    println!(
        "Status: {} -> {}{}",
        a.status,
        b.status,
        if diff.status_changed { " (changed)" } else { "" }
    );
    println!("Duration: {:+}ms", diff.duration_diff);

    if diff.node_changes.is_empty() {
        println!("No node changes");
        return Ok(());
    }

    let rows: Vec<NodeChangeRow> = diff
        .node_changes
        .iter()
        .map(|change| NodeChangeRow {
            node_id: change.node_id.clone(),
            change: format!("{:?}", change.kind).to_lowercase(),
            before: change
                .node_a
                .as_ref()
                .map(|node| node.status.to_string())
                .unwrap_or_else(|| "-".to_string()),
            after: change
                .node_b
                .as_ref()
                .map(|node| node.status.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

async fn show_timeline(
    store: &SnapshotStore,
    execution_id: &str,
    step: Option<usize>,
    json: bool,
) -> Result<(), anyhow::Error> {
    let snapshot = load(store, execution_id).await?;
    let view = create_timeline_view(&snapshot, step);

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!(
        "{} [{}] {}",
        view.execution_id,
        view.status,
        format_duration(view.duration_ms)
    );
    if view.steps.is_empty() {
        println!("  (no recorded steps)");
    }
    for step in &view.steps {
        let marker = if step.is_selected { "▶" } else { " " };
        println!(
            "{marker} {:>3}. {} {} [{}] {}ms - {}",
            step.index + 1,
            step.node_icon,
            step.node_name,
            step.status,
            step.duration_ms,
            step.description
        );
    }
    Ok(())
}

async fn load(store: &SnapshotStore, execution_id: &str) -> Result<ExecutionSnapshot, anyhow::Error> {
    match store.get_snapshot(execution_id).await? {
        Some(snapshot) => Ok(snapshot),
        None => bail!("Snapshot '{execution_id}' not found"),
    }
}

fn parse_status(value: &str) -> Result<ExecutionStatus, String> {
    value.parse().map_err(|e: rewind_core::StoreError| e.to_string())
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("'{value}' is neither RFC 3339 nor YYYY-MM-DD"))
}

fn format_duration(duration_ms: Option<i64>) -> String {
    match duration_ms {
        Some(ms) if ms >= 60_000 => format!("{}m {:.1}s", ms / 60_000, (ms % 60_000) as f64 / 1000.0),
        Some(ms) if ms >= 1000 => format!("{:.1}s", ms as f64 / 1000.0),
        Some(ms) => format!("{ms}ms"),
        None => "-".to_string(),
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    use chrono::Local;

    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
