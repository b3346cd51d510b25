// SparkStore trait: backend-agnostic async interface for the sparks collection.
//
// Implementors: SqliteSparkStore (wraps rusqlite), PgSparkStore (wraps sqlx).
// All methods are async so both the mutex-guarded SQLite connection and the
// native async Postgres pool fit behind a single interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::geo::geohash::CellRange;
use crate::spark::{NewSpark, Spark};

/// Row counts for `sparkdrop status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SparkCounts {
    pub total: u64,
    pub active: u64,
}

#[async_trait]
pub trait SparkStore: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Writes ---

    /// Insert a new spark. The store assigns the id and re-stamps
    /// `created_at`/`expires_at` from its own clock.
    async fn insert(&self, spark: NewSpark) -> Result<Spark>;

    /// Atomically add one to `warmed_count` and return the new value.
    ///
    /// Fails with `NotFound` when the spark does not exist at transaction
    /// time and `TransactionFailed` when concurrent writers keep winning.
    async fn warm(&self, id: &str) -> Result<u64>;

    /// Physically delete sparks whose expiry is at or before `now`.
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    // --- Reads ---

    /// Point lookup. Expired sparks are still returned.
    async fn get(&self, id: &str) -> Result<Option<Spark>>;

    /// Unexpired sparks whose stored geohash falls inside `range`.
    async fn query_range(&self, range: &CellRange, now: DateTime<Utc>) -> Result<Vec<Spark>>;

    /// Total and still-active spark counts.
    async fn counts(&self, now: DateTime<Utc>) -> Result<SparkCounts>;
}
