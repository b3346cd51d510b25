// SqliteSparkStore: rusqlite backend implementing the SparkStore trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is released before any other .await.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::traits::{SparkCounts, SparkStore};
use super::{queries, run_warm_transaction};
use crate::clock::{from_millis, Clock};
use crate::error::Result;
use crate::geo::geohash::{self, CellRange};
use crate::spark::{NewSpark, Spark};

pub struct SqliteSparkStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteSparkStore {
    /// Wrap an already-opened (and migrated) rusqlite Connection.
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn: Mutex::new(conn),
            clock,
        }
    }

    async fn warm_once(&self, id: &str) -> anyhow::Result<super::WarmAttempt> {
        let conn = self.conn.lock().await;
        queries::try_warm(&conn, id)
    }
}

#[async_trait]
impl SparkStore for SqliteSparkStore {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(super::schema::table_count(&conn)?)
    }

    async fn insert(&self, spark: NewSpark) -> Result<Spark> {
        // Stored at millisecond precision; stamp at the same precision.
        let spark = spark.stamped_at(from_millis(self.clock.now_ms()));
        let id = uuid::Uuid::new_v4().to_string();
        let hash = geohash::encode(spark.coordinates, geohash::STORED_PRECISION);

        let conn = self.conn.lock().await;
        queries::insert_spark(&conn, &id, &spark, &hash)?;
        Ok(spark.into_spark(id))
    }

    async fn warm(&self, id: &str) -> Result<u64> {
        run_warm_transaction(id, || self.warm_once(id)).await
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        Ok(queries::delete_expired(&conn, now.timestamp_millis())?)
    }

    async fn get(&self, id: &str) -> Result<Option<Spark>> {
        let conn = self.conn.lock().await;
        Ok(queries::get_spark(&conn, id)?)
    }

    async fn query_range(&self, range: &CellRange, now: DateTime<Utc>) -> Result<Vec<Spark>> {
        let conn = self.conn.lock().await;
        Ok(queries::sparks_in_range(
            &conn,
            &range.start,
            &range.end,
            now.timestamp_millis(),
        )?)
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<SparkCounts> {
        let conn = self.conn.lock().await;
        Ok(queries::count_sparks(&conn, now.timestamp_millis())?)
    }
}
