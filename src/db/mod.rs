// Database layer: persistent storage for sparks.
//
// SQLite (rusqlite, "bundled") is the default backend; the file lives wherever
// SPARKDROP_DB_PATH points (defaults to ./sparkdrop.db). PostgreSQL is available
// behind the `postgres` feature for multi-device deployments.

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod queries;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use traits::{SparkCounts, SparkStore};

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::error::{Result, SparkError};

/// How many times a warm is retried when another writer keeps winning.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Outcome of one optimistic read-modify-write on `warmed_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmAttempt {
    Committed(u64),
    Conflict,
    Missing,
}

/// Drive a warm transaction: retry on conflict, give up after
/// `MAX_TRANSACTION_ATTEMPTS`.
pub(crate) async fn run_warm_transaction<F, Fut>(id: &str, mut attempt: F) -> Result<u64>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<WarmAttempt>>,
{
    for n in 1..=MAX_TRANSACTION_ATTEMPTS {
        match attempt().await? {
            WarmAttempt::Committed(count) => return Ok(count),
            WarmAttempt::Missing => return Err(SparkError::NotFound(id.to_string())),
            WarmAttempt::Conflict => {
                debug!(spark_id = id, attempt = n, "Warm conflicted, retrying");
                tokio::task::yield_now().await;
            }
        }
    }
    Err(SparkError::TransactionFailed {
        attempts: MAX_TRANSACTION_ATTEMPTS,
    })
}

/// Open (or create) the SQLite database, run migrations, and wrap it as a store.
#[cfg(feature = "sqlite")]
pub fn initialize_sqlite(db_path: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn SparkStore>> {
    use anyhow::Context;
    use std::path::Path;

    // Create parent directories if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {}", db_path))?;
        }
    }

    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::create_tables(&conn)?;

    Ok(Arc::new(sqlite::SqliteSparkStore::new(conn, clock)))
}

/// Open an existing SQLite database (fails if it doesn't exist yet).
///
/// Migrations still run so a database created by an older build picks up
/// new columns.
#[cfg(feature = "sqlite")]
pub fn open_sqlite(db_path: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn SparkStore>> {
    if !std::path::Path::new(db_path).exists() {
        anyhow::bail!(
            "Database not found at {}. Run `sparkdrop init` first.",
            db_path
        );
    }
    initialize_sqlite(db_path, clock)
}

/// An in-memory SQLite store, for tests and throwaway sessions.
#[cfg(feature = "sqlite")]
pub fn in_memory_sqlite(clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn SparkStore>> {
    let conn = rusqlite::Connection::open_in_memory()?;
    schema::create_tables(&conn)?;
    Ok(Arc::new(sqlite::SqliteSparkStore::new(conn, clock)))
}

/// Connect to PostgreSQL, run migrations, and wrap the pool as a store.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(
    database_url: &str,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn SparkStore>> {
    let db = postgres::PgSparkStore::connect(database_url, clock).await?;
    Ok(Arc::new(db))
}
