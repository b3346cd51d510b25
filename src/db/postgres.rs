// PgSparkStore: PostgreSQL backend implementing the SparkStore trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Geohash comparisons use COLLATE "C" so range scans follow byte order
// regardless of the database locale.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};

use super::traits::{SparkCounts, SparkStore};
use super::{run_warm_transaction, WarmAttempt};
use crate::clock::{from_millis, Clock};
use crate::geo::geohash::{self, CellRange};
use crate::spark::{Coordinates, NewSpark, Spark};

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

const SPARK_COLUMNS: &str =
    "id, text, photo_url, latitude, longitude, created_at_ms, expires_at_ms, warmed_count";

pub struct PgSparkStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgSparkStore {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to PostgreSQL at {database_url}"))?;

        let db = Self { pool, clock };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on a dedicated connection so two
    /// processes starting together don't apply the same migration twice.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "SPARKDRP" as a big-endian i64.
        const MIGRATION_LOCK_KEY: i64 = 0x535041524B445250_u64 as i64;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [(1, include_str!("../../migrations/postgres/0001_initial.sql"))];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<bool, _>(0))
                .unwrap_or(false);

                if !applied {
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit().await?;
                }
            }

            Ok(())
        }
        .await;

        // Unlock even if a migration failed; the migration error wins.
        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        migration_result?;
        unlock_result?;

        Ok(())
    }

    async fn warm_once(&self, id: &str) -> Result<WarmAttempt> {
        let row = sqlx_core::query::query("SELECT warmed_count, version FROM sparks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(WarmAttempt::Missing);
        };
        let count: i64 = row.get(0);
        let version: i64 = row.get(1);
        let next = count.max(0) + 1;

        let result = sqlx_core::query::query(
            "UPDATE sparks SET warmed_count = $1, version = version + 1
             WHERE id = $2 AND version = $3",
        )
        .bind(next)
        .bind(id)
        .bind(version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(WarmAttempt::Conflict)
        } else {
            Ok(WarmAttempt::Committed(next as u64))
        }
    }
}

fn spark_from_row(row: &PgRow) -> Spark {
    Spark {
        id: row.get(0),
        text: row.get(1),
        photo_url: row.get(2),
        coordinates: Coordinates {
            latitude: row.get(3),
            longitude: row.get(4),
        },
        created_at: from_millis(row.get(5)),
        expires_at: from_millis(row.get(6)),
        warmed_count: row.get::<i64, _>(7).max(0) as u64,
    }
}

#[async_trait]
impl SparkStore for PgSparkStore {
    async fn table_count(&self) -> crate::error::Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count tables")?;
        Ok(row.get::<i64, _>(0))
    }

    async fn insert(&self, spark: NewSpark) -> crate::error::Result<Spark> {
        // Stored at millisecond precision; stamp at the same precision.
        let spark = spark.stamped_at(from_millis(self.clock.now_ms()));
        let id = uuid::Uuid::new_v4().to_string();
        let hash = geohash::encode(spark.coordinates, geohash::STORED_PRECISION);

        sqlx_core::query::query(
            "INSERT INTO sparks (id, text, photo_url, latitude, longitude, geohash,
                                 created_at_ms, expires_at_ms, warmed_count, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0)",
        )
        .bind(&id)
        .bind(&spark.text)
        .bind(&spark.photo_url)
        .bind(spark.coordinates.latitude)
        .bind(spark.coordinates.longitude)
        .bind(&hash)
        .bind(spark.created_at.timestamp_millis())
        .bind(spark.expires_at.timestamp_millis())
        .bind(spark.warmed_count as i64)
        .execute(&self.pool)
        .await
        .context("Failed to insert spark")?;

        Ok(spark.into_spark(id))
    }

    async fn warm(&self, id: &str) -> crate::error::Result<u64> {
        run_warm_transaction(id, || self.warm_once(id)).await
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> crate::error::Result<usize> {
        let result = sqlx_core::query::query("DELETE FROM sparks WHERE expires_at_ms <= $1")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .context("Failed to reap expired sparks")?;
        Ok(result.rows_affected() as usize)
    }

    async fn get(&self, id: &str) -> crate::error::Result<Option<Spark>> {
        let row = sqlx_core::query::query(&format!(
            "SELECT {SPARK_COLUMNS} FROM sparks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load spark")?;
        Ok(row.as_ref().map(spark_from_row))
    }

    async fn query_range(
        &self,
        range: &CellRange,
        now: DateTime<Utc>,
    ) -> crate::error::Result<Vec<Spark>> {
        let rows = sqlx_core::query::query(&format!(
            "SELECT {SPARK_COLUMNS} FROM sparks
             WHERE geohash COLLATE \"C\" >= $1 AND geohash COLLATE \"C\" < $2
               AND expires_at_ms > $3
             ORDER BY geohash COLLATE \"C\""
        ))
        .bind(&range.start)
        .bind(&range.end)
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query sparks by geohash range")?;
        Ok(rows.iter().map(spark_from_row).collect())
    }

    async fn counts(&self, now: DateTime<Utc>) -> crate::error::Result<SparkCounts> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint,
                    COUNT(*) FILTER (WHERE expires_at_ms > $1)::bigint
             FROM sparks",
        )
        .bind(now.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count sparks")?;
        Ok(SparkCounts {
            total: row.get::<i64, _>(0).max(0) as u64,
            active: row.get::<i64, _>(1).max(0) as u64,
        })
    }
}
