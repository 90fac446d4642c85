//! SQLite-backed sink.
//!
//! Each batch is written inside one transaction, so a batch is either fully
//! committed or rolled back. Rows are keyed by record id and inserted with
//! `ON CONFLICT (id) DO NOTHING`, which makes replays of already-stored
//! records a no-op.
//!
//! WAL journal mode lets readers (`fetch_all`, other processes inspecting the
//! file) proceed while a batch is being written. Several consumer processes
//! may share one database file; `busy_timeout` serializes their writers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use batchline_types::{EventRecord, RecordId, wire};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use tracing::{debug, info};

use crate::{PersistError, Sink};

const CREATE_EVENTS_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        age INTEGER NOT NULL,
        city TEXT NOT NULL,
        created_date TIMESTAMP NOT NULL
    )
";

const INSERT_EVENT: &str = r"
    INSERT INTO events (id, name, age, city, created_date)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (id) DO NOTHING
";

/// Configuration for the sink's connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections (default: 1, one writer per consumer)
    pub max_connections: u32,
    /// Busy timeout in milliseconds (default: 5000)
    pub busy_timeout_ms: u64,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 1,
            busy_timeout_ms: 5000,
            acquire_timeout_secs: 30,
        }
    }
}

/// Durable sink writing to the `events` table of a SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteSink {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteSink {
    /// Opens (creating if missing) the database at `path` with default pool
    /// settings and ensures the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        Self::open_with(path, PoolConfig::default()).await
    }

    /// Opens the database at `path` with an explicit pool configuration.
    pub async fn open_with(
        path: impl AsRef<Path>,
        config: PoolConfig,
    ) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        let sink = Self { pool, path };
        sink.ensure_schema().await?;

        info!(
            path = %sink.path.display(),
            max_connections = config.max_connections,
            "Event store opened"
        );

        Ok(sink)
    }

    /// Creates the `events` table if it doesn't exist.
    pub async fn ensure_schema(&self) -> Result<(), PersistError> {
        sqlx::query(CREATE_EVENTS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64, PersistError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.unsigned_abs())
    }

    /// Returns every stored record in insertion order.
    pub async fn fetch_all(&self) -> Result<Vec<EventRecord>, PersistError> {
        let rows: Vec<(String, String, i64, String, String)> = sqlx::query_as(
            "SELECT id, name, age, city, created_date FROM events ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Sink for SqliteSink {
    async fn persist(&self, records: &[EventRecord]) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }

        // Dropping the transaction on any error rolls it back.
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(INSERT_EVENT)
                .bind(record.id.to_string())
                .bind(record.name.as_str())
                .bind(record.age)
                .bind(record.city.as_str())
                .bind(record.created_date_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(batch_size = records.len(), "Batch committed");
        Ok(())
    }
}

fn row_to_record(row: (String, String, i64, String, String)) -> Result<EventRecord, PersistError> {
    let (id, name, age, city, created_date) = row;

    let corrupt = |reason: String| PersistError::CorruptRow {
        id: id.clone(),
        reason,
    };

    let record_id: RecordId = id.parse().map_err(|e| corrupt(format!("bad id: {e}")))?;
    let age = u32::try_from(age).map_err(|_| corrupt(format!("age {age} out of range")))?;
    let created = wire::created_date::parse(&created_date)
        .ok_or_else(|| corrupt(format!("bad created_date `{created_date}`")))?;

    Ok(EventRecord::new(record_id, name, age, city, created))
}
