/*!
Transactional indexed backend on SQLite.

Each store name maps to one table keyed by `execution_id`. The list-view
fields live in their own columns, indexed on `workflow_id`, `status`,
`started_at_ms` and `(workflow_id, status)`, so history queries filter in SQL
and never touch the full snapshot body stored in `data`.
*/

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::SnapshotBackend;
use crate::config::{is_valid_store_name, BackendKind};
use crate::model::{ExecutionSnapshot, ExecutionStatus, SnapshotListItem};
use crate::query::SnapshotFilter;
use crate::{Result, StoreError};

/// Schema version recorded in `PRAGMA user_version`
pub const DB_VERSION: i64 = 1;

const MAX_CONNECTIONS: u32 = 4;

const LIST_COLUMNS: &str = "execution_id, workflow_id, workflow_name, status, started_at, \
                            completed_at, duration_ms, summary";

/// SQLite-backed snapshot store
#[derive(Debug)]
pub struct IndexedBackend {
    pool: SqlitePool,
    table: String,
    path: PathBuf,
}

impl IndexedBackend {
    /// Open (creating if needed) `<dir>/<db_name>.db` and prepare the table
    pub async fn open(dir: &Path, db_name: &str, table: &str) -> Result<Self> {
        if !is_valid_store_name(table) {
            return Err(StoreError::validation(format!(
                "'{table}' is not a valid table name"
            )));
        }
        std::fs::create_dir_all(dir).map_err(|e| {
            StoreError::backend_unavailable(
                BackendKind::Indexed,
                format!("cannot create {}: {e}", dir.display()),
            )
        })?;

        let path = dir.join(format!("{db_name}.db"));
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let backend = Self {
            pool,
            table: table.to_string(),
            path,
        };
        backend.migrate().await?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn migrate(&self) -> Result<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        if version > DB_VERSION {
            return Err(StoreError::backend_unavailable(
                BackendKind::Indexed,
                format!(
                    "database {} has schema version {version}, newer than supported {DB_VERSION}",
                    self.path.display()
                ),
            ));
        }

        let t = &self.table;
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                execution_id  TEXT PRIMARY KEY NOT NULL,
                workflow_id   TEXT NOT NULL,
                workflow_name TEXT,
                status        TEXT NOT NULL,
                started_at    TEXT NOT NULL,
                started_at_ms INTEGER NOT NULL,
                completed_at  TEXT,
                duration_ms   INTEGER,
                summary       TEXT NOT NULL,
                compressed    INTEGER NOT NULL DEFAULT 0,
                data          TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            )
            "#
        ))
        .execute(&mut *tx)
        .await?;

        for (name, columns) in [
            ("workflow", "workflow_id"),
            ("status", "status"),
            ("started", "started_at_ms"),
            ("workflow_status", "workflow_id, status"),
        ] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_{name} ON {t} ({columns})"
            ))
            .execute(&mut *tx)
            .await?;
        }

        if version < DB_VERSION {
            sqlx::query(&format!("PRAGMA user_version = {DB_VERSION}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(path = %self.path.display(), table = %t, "Indexed backend ready");
        Ok(())
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::invalid_format(format!("bad timestamp '{raw}': {e}")))
}

fn list_item_from_row(row: &SqliteRow) -> Result<SnapshotListItem> {
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let summary: String = row.try_get("summary")?;

    Ok(SnapshotListItem {
        execution_id: row.try_get("execution_id")?,
        workflow_id: row.try_get("workflow_id")?,
        workflow_name: row.try_get("workflow_name")?,
        status: status.parse::<ExecutionStatus>()?,
        started_at: parse_timestamp(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        duration_ms: row.try_get("duration_ms")?,
        summary: serde_json::from_str(&summary)?,
    })
}

#[async_trait]
impl SnapshotBackend for IndexedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Indexed
    }

    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        let data = serde_json::to_string(snapshot)?;
        let summary = serde_json::to_string(&snapshot.summary)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            r#"
            INSERT OR REPLACE INTO {} (execution_id, workflow_id, workflow_name, status,
                started_at, started_at_ms, completed_at, duration_ms, summary, compressed,
                data, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            self.table
        ))
        .bind(&snapshot.execution_id)
        .bind(&snapshot.workflow_id)
        .bind(&snapshot.workflow_name)
        .bind(snapshot.status.as_str())
        .bind(timestamp(&snapshot.started_at))
        .bind(snapshot.started_at.timestamp_millis())
        .bind(snapshot.completed_at.as_ref().map(timestamp))
        .bind(snapshot.duration_ms)
        .bind(summary)
        .bind(snapshot.metadata.compressed)
        .bind(data)
        .bind(timestamp(&Utc::now()))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionSnapshot>> {
        let data: Option<String> = sqlx::query_scalar(&format!(
            "SELECT data FROM {} WHERE execution_id = ?",
            self.table
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        data.map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE execution_id = ?",
            self.table
        ))
        .bind(execution_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_all(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotListItem>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {LIST_COLUMNS} FROM {}", self.table));

        let mut separator = " WHERE ";
        if let Some(workflow_id) = &filter.workflow_id {
            builder.push(separator).push("workflow_id = ").push_bind(workflow_id.clone());
            separator = " AND ";
        }
        if let Some(status) = filter.status {
            builder.push(separator).push("status = ").push_bind(status.as_str());
            separator = " AND ";
        }
        // Millisecond columns narrow the scan; `matches` below keeps the exact bounds.
        if let Some(start) = filter.start_date {
            builder
                .push(separator)
                .push("started_at_ms >= ")
                .push_bind(start.timestamp_millis());
            separator = " AND ";
        }
        if let Some(end) = filter.end_date {
            builder
                .push(separator)
                .push("started_at_ms <= ")
                .push_bind(end.timestamp_millis());
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let item = list_item_from_row(row)?;
            if filter.matches(&item) {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn count(&self, workflow_id: Option<&str>) -> Result<usize> {
        let count: i64 = match workflow_id {
            Some(workflow_id) => {
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {} WHERE workflow_id = ?",
                    self.table
                ))
                .bind(workflow_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
