//! SQLite persistence using sqlx.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC); status
//! and snapshot rows keep their full JSON payload.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, Pool, Sqlite};

use super::{DiagnosticsSink, StateStore, StatusSink};
use crate::Result;
use crate::domain::{BindingStatus, CreatorStatus, Snapshot};
use crate::logging::{DiagnosticRecord, Severity};

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 4;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

async fn apply_per_connection_pragmas(
    conn: &mut sqlx::SqliteConnection,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("PRAGMA wal_autocheckpoint = 1000")
        .execute(&mut *conn)
        .await?;

    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Initialize the connection pool with WAL mode.
///
/// # Arguments
/// * `database_url` - SQLite database URL (e.g., "sqlite:livewatch.db?mode=rwc")
/// * `max_connections` - Maximum number of connections in the pool. In-memory
///   databases must use a single connection.
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> std::result::Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
        })
        .connect_with(connect_options)
        .await?;

    tracing::info!(
        "Database pool initialized with {} max connections",
        max_connections
    );

    Ok(pool)
}

/// Initialize the connection pool with the default size.
pub async fn init_pool(database_url: &str) -> std::result::Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, DEFAULT_POOL_SIZE).await
}

pub async fn run_migrations(pool: &DbPool) -> std::result::Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[derive(Debug, FromRow)]
struct PayloadRow {
    payload: String,
}

#[derive(Debug, FromRow)]
struct DiagnosticRow {
    timestamp: i64,
    severity: String,
    creator_id: Option<String>,
    binding_id: Option<String>,
    target: String,
    message: String,
    context: Option<String>,
}

impl DiagnosticRow {
    fn into_record(self) -> DiagnosticRecord {
        DiagnosticRecord {
            timestamp: ms_to_datetime(self.timestamp),
            severity: Severity::from_str(&self.severity).unwrap_or(Severity::Info),
            creator_id: self.creator_id,
            binding_id: self.binding_id,
            target: self.target,
            message: self.message,
            context: self
                .context
                .and_then(|c| serde_json::from_str(&c).ok())
                .unwrap_or_default(),
        }
    }
}

/// SQLite implementation of every store seam.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open the database at `database_url` and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get_snapshot(&self, creator_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query_as::<_, PayloadRow>(
            "SELECT payload FROM creator_snapshot WHERE creator_id = ?",
        )
        .bind(creator_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.payload)?)),
            None => Ok(None),
        }
    }

    async fn put_snapshot(&self, creator_id: &str, snapshot: &Snapshot) -> Result<()> {
        let payload = serde_json::to_string(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO creator_snapshot (creator_id, payload, checked_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(creator_id) DO UPDATE SET
                payload = excluded.payload,
                checked_at = excluded.checked_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(creator_id)
        .bind(&payload)
        .bind(snapshot.checked_at.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_snapshot(&self, creator_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM creator_snapshot WHERE creator_id = ?")
            .bind(creator_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatusSink for SqliteStore {
    async fn put_creator_status(&self, status: &CreatorStatus) -> Result<()> {
        let payload = serde_json::to_string(status)?;
        sqlx::query(
            r#"
            INSERT INTO creator_status (creator_id, payload, checked_at, last_error)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(creator_id) DO UPDATE SET
                payload = excluded.payload,
                checked_at = excluded.checked_at,
                last_error = excluded.last_error
            "#,
        )
        .bind(&status.creator_id)
        .bind(&payload)
        .bind(status.checked_at.timestamp_millis())
        .bind(&status.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_creator_status(&self, creator_id: &str) -> Result<Option<CreatorStatus>> {
        let row = sqlx::query_as::<_, PayloadRow>(
            "SELECT payload FROM creator_status WHERE creator_id = ?",
        )
        .bind(creator_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.payload)?)),
            None => Ok(None),
        }
    }

    async fn delete_creator_status(&self, creator_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM creator_status WHERE creator_id = ?")
            .bind(creator_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_binding_status(&self, status: &BindingStatus) -> Result<()> {
        let payload = serde_json::to_string(status)?;
        sqlx::query(
            r#"
            INSERT INTO binding_status (binding_id, creator_id, connection, payload, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(binding_id) DO UPDATE SET
                creator_id = excluded.creator_id,
                connection = excluded.connection,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&status.binding_id)
        .bind(&status.creator_id)
        .bind(status.connection.to_string())
        .bind(&payload)
        .bind(status.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_binding_status(&self, binding_id: &str) -> Result<Option<BindingStatus>> {
        let row = sqlx::query_as::<_, PayloadRow>(
            "SELECT payload FROM binding_status WHERE binding_id = ?",
        )
        .bind(binding_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.payload)?)),
            None => Ok(None),
        }
    }

    async fn delete_binding_status(&self, binding_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM binding_status WHERE binding_id = ?")
            .bind(binding_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DiagnosticsSink for SqliteStore {
    async fn append(&self, record: &DiagnosticRecord) -> Result<()> {
        let context = if record.context.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.context)?)
        };

        sqlx::query(
            r#"
            INSERT INTO diagnostics (timestamp, severity, creator_id, binding_id, target, message, context)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.timestamp.timestamp_millis())
        .bind(record.severity.to_string())
        .bind(&record.creator_id)
        .bind(&record.binding_id)
        .bind(&record.target)
        .bind(&record.message)
        .bind(context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DiagnosticRecord>> {
        let rows = sqlx::query_as::<_, DiagnosticRow>(
            r#"
            SELECT timestamp, severity, creator_id, binding_id, target, message, context
            FROM diagnostics
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DiagnosticRow::into_record).collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM diagnostics WHERE timestamp < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
