//! SQLite store implementation
//!
//! All three store traits are implemented on one embedded database.
//!
//! ## Features
//!
//! - **Embedded**: no separate database server required
//! - **WAL mode**: readers keep working while connection tasks insert
//! - **Connection pooling**: shared across all ingestion tasks
//! - **Migrations**: automatic schema versioning with sqlx
//!
//! ## Limitations
//!
//! - **Concurrency**: limited concurrent writes, fine for the small agent
//!   counts this system targets
//! - **Distributed**: single-machine only

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::StatusReport;

use super::backend::{Host, HostStore, ProbeRecord, ProbeStore, Recipient, RecipientDirectory};
use super::error::{StoreError, StoreResult};
use super::utc_today_window;

/// SQLite-backed host store, probe store, and recipient directory.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations.
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use pulsewatch::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::open("./pulsewatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("opening SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        info!("database ready");

        Ok(Self { pool })
    }

    /// Insert or replace a monitored host.
    pub async fn add_host(&self, host: &Host) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO hosts (id, name, address, interval_minutes, protocol)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                address = excluded.address,
                interval_minutes = excluded.interval_minutes,
                protocol = excluded.protocol
            "#,
        )
        .bind(host.id)
        .bind(&host.name)
        .bind(&host.address)
        .bind(host.interval_minutes)
        .bind(host.protocol)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    /// Add a notification recipient.
    pub async fn add_recipient(&self, recipient: &Recipient) -> StoreResult<()> {
        sqlx::query("INSERT INTO recipients (email, handle) VALUES (?, ?)")
            .bind(recipient.email.as_deref())
            .bind(recipient.handle.as_deref())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    pub async fn close(&self) {
        info!("closing SQLite store");
        self.pool.close().await;
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }
}

fn host_from_row(row: &SqliteRow) -> Host {
    Host {
        id: row.get("id"),
        name: row.get("name"),
        address: row.get("address"),
        interval_minutes: row.get("interval_minutes"),
        protocol: row.get("protocol"),
    }
}

#[async_trait]
impl HostStore for SqliteStore {
    #[instrument(skip(self))]
    async fn host(&self, id: u32) -> StoreResult<Option<Host>> {
        let row = sqlx::query(
            "SELECT id, name, address, interval_minutes, protocol FROM hosts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(row.map(|row| host_from_row(&row)))
    }

    #[instrument(skip(self))]
    async fn list_hosts(&self) -> StoreResult<Vec<Host>> {
        let rows = sqlx::query(
            "SELECT id, name, address, interval_minutes, protocol FROM hosts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        Ok(rows.iter().map(host_from_row).collect())
    }
}

#[async_trait]
impl ProbeStore for SqliteStore {
    #[instrument(skip(self, record), fields(host_id = record.host_id))]
    async fn insert(&self, record: &ProbeRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO probe_reports (
                host_id, timestamp, response_time_ms, success,
                status_code, protocol, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.host_id)
        .bind(Self::timestamp_to_millis(&record.timestamp))
        .bind(record.response_time_ms)
        .bind(record.success)
        .bind(record.status_code)
        .bind(record.protocol.wire_tag())
        .bind(record.error_message.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        debug!("persisted probe report");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn dashboard_stats(&self) -> StoreResult<StatusReport> {
        let (start, end) = utc_today_window();

        let row = sqlx::query(
            r#"
            WITH today AS (
                SELECT host_id, timestamp, success
                FROM probe_reports
                WHERE timestamp >= ? AND timestamp < ?
            ),
            ranked AS (
                SELECT host_id, success,
                       ROW_NUMBER() OVER (
                           PARTITION BY host_id ORDER BY timestamp DESC
                       ) AS rn
                FROM today
            )
            SELECT
                (SELECT COUNT(DISTINCT host_id) FROM today) AS total_servers,
                (SELECT COUNT(*) FROM ranked WHERE rn = 1 AND success = 1) AS up_servers,
                (SELECT COUNT(*) FROM today WHERE success = 0) AS incidents
            "#,
        )
        .bind(Self::timestamp_to_millis(&start))
        .bind(Self::timestamp_to_millis(&end))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let total: i64 = row.get("total_servers");
        let up: i64 = row.get("up_servers");
        let incidents: i64 = row.get("incidents");

        Ok(StatusReport {
            total_servers: total as u32,
            up_servers: up as u32,
            down_servers: (total - up).max(0) as u32,
            total_incidents_today: incidents as u32,
        })
    }
}

#[async_trait]
impl RecipientDirectory for SqliteStore {
    #[instrument(skip(self))]
    async fn list_recipients(&self) -> StoreResult<Vec<Recipient>> {
        let rows = sqlx::query("SELECT email, handle FROM recipients ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let recipients = rows
            .into_iter()
            .map(|row| Recipient {
                email: row.get("email"),
                handle: row.get("handle"),
            })
            .filter(|recipient| recipient.email.is_some() || recipient.handle.is_some())
            .collect();

        Ok(recipients)
    }
}
