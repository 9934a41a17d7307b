//! Backing stores for hosts, probe history, and recipients
//!
//! The ingestion path talks to three narrow store interfaces rather than a
//! database handle, so deployments can split them across systems.
//!
//! ## Design
//!
//! - **Trait-based**: `HostStore`, `ProbeStore` and `RecipientDirectory` can
//!   be implemented independently
//! - **Async**: all operations are async for compatibility with the Tokio
//!   connection tasks
//! - **Bundled backends**: SQLite (persistent, default) and in-memory (tests
//!   and the `storage = "none"` mode) implement all three traits each
//!
//! ## Usage
//!
//! ```no_run
//! use pulsewatch::storage::{ProbeStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::open("./pulsewatch.db").await?;
//!     let stats = store.dashboard_stats().await?;
//!     println!("{} hosts up", stats.up_servers);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use backend::{Host, HostStore, ProbeRecord, ProbeStore, Recipient, RecipientDirectory};
pub use error::{StoreError, StoreResult};

use chrono::{DateTime, Duration, NaiveTime, Utc};

/// Today's UTC day as a half-open `[start, end)` window.
///
/// All daily rollups use this window so the backends agree on what "today"
/// means.
pub fn utc_today_window() -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}
