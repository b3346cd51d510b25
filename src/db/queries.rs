// Database queries: every SQL statement against the sparks table.
//
// Keeps SQL contained in one place and gives SqliteSparkStore clean Rust
// interfaces. Timestamps are stored as epoch milliseconds.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::traits::SparkCounts;
use super::WarmAttempt;
use crate::clock::from_millis;
use crate::spark::{Coordinates, NewSpark, Spark};

const SPARK_COLUMNS: &str =
    "id, text, photo_url, latitude, longitude, created_at_ms, expires_at_ms, warmed_count";

fn spark_from_row(row: &Row<'_>) -> rusqlite::Result<Spark> {
    let warmed: i64 = row.get(7)?;
    Ok(Spark {
        id: row.get(0)?,
        text: row.get(1)?,
        photo_url: row.get(2)?,
        coordinates: Coordinates {
            latitude: row.get(3)?,
            longitude: row.get(4)?,
        },
        created_at: from_millis(row.get(5)?),
        expires_at: from_millis(row.get(6)?),
        warmed_count: warmed.max(0) as u64,
    })
}

// --- Writes ---

/// Insert a spark row with the given id and geohash.
pub fn insert_spark(conn: &Connection, id: &str, spark: &NewSpark, geohash: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sparks (id, text, photo_url, latitude, longitude, geohash,
                             created_at_ms, expires_at_ms, warmed_count, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
        params![
            id,
            spark.text,
            spark.photo_url,
            spark.coordinates.latitude,
            spark.coordinates.longitude,
            geohash,
            spark.created_at.timestamp_millis(),
            spark.expires_at.timestamp_millis(),
            spark.warmed_count as i64,
        ],
    )?;
    Ok(())
}

/// One optimistic warm attempt: read the counter and its version, then write
/// `count + 1` only if nobody else bumped the version in between.
pub fn try_warm(conn: &Connection, id: &str) -> Result<WarmAttempt> {
    let current: Option<(i64, i64)> = conn
        .query_row(
            "SELECT warmed_count, version FROM sparks WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((count, version)) = current else {
        return Ok(WarmAttempt::Missing);
    };

    let next = count.max(0) + 1;
    let changed = conn.execute(
        "UPDATE sparks SET warmed_count = ?1, version = version + 1
         WHERE id = ?2 AND version = ?3",
        params![next, id, version],
    )?;

    if changed == 0 {
        Ok(WarmAttempt::Conflict)
    } else {
        Ok(WarmAttempt::Committed(next as u64))
    }
}

/// Delete every spark that expired at or before `now_ms`.
pub fn delete_expired(conn: &Connection, now_ms: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM sparks WHERE expires_at_ms <= ?1",
        params![now_ms],
    )?;
    Ok(deleted)
}

// --- Reads ---

pub fn get_spark(conn: &Connection, id: &str) -> Result<Option<Spark>> {
    let mut stmt = conn.prepare(&format!("SELECT {SPARK_COLUMNS} FROM sparks WHERE id = ?1"))?;
    let result = stmt.query_row(params![id], spark_from_row).optional()?;
    Ok(result)
}

/// Unexpired sparks with `start <= geohash < end`.
pub fn sparks_in_range(conn: &Connection, start: &str, end: &str, now_ms: i64) -> Result<Vec<Spark>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SPARK_COLUMNS} FROM sparks
         WHERE geohash >= ?1 AND geohash < ?2 AND expires_at_ms > ?3
         ORDER BY geohash"
    ))?;

    let rows = stmt.query_map(params![start, end, now_ms], spark_from_row)?;
    let mut sparks = Vec::new();
    for row in rows {
        sparks.push(row?);
    }
    Ok(sparks)
}

pub fn count_sparks(conn: &Connection, now_ms: i64) -> Result<SparkCounts> {
    let (total, active): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN expires_at_ms > ?1 THEN 1 ELSE 0 END), 0)
         FROM sparks",
        params![now_ms],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(SparkCounts {
        total: total.max(0) as u64,
        active: active.max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    fn draft(created_ms: i64) -> NewSpark {
        NewSpark {
            text: "by the fountain".to_string(),
            photo_url: None,
            coordinates: Coordinates {
                latitude: 10.0,
                longitude: 20.0,
            },
            created_at: from_millis(created_ms),
            expires_at: from_millis(created_ms + 1_000),
            warmed_count: 0,
        }
    }

    #[test]
    fn warm_bumps_count_and_version() {
        let conn = conn();
        insert_spark(&conn, "a", &draft(0), "s0000000000").unwrap();

        assert!(matches!(try_warm(&conn, "a").unwrap(), WarmAttempt::Committed(1)));
        assert!(matches!(try_warm(&conn, "a").unwrap(), WarmAttempt::Committed(2)));
        let version: i64 = conn
            .query_row("SELECT version FROM sparks WHERE id = 'a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
        assert!(matches!(try_warm(&conn, "missing").unwrap(), WarmAttempt::Missing));
    }

    #[test]
    fn range_query_skips_expired_rows() {
        let conn = conn();
        insert_spark(&conn, "old", &draft(0), "s0000000000").unwrap();
        insert_spark(&conn, "new", &draft(5_000), "s0000000001").unwrap();

        let found = sparks_in_range(&conn, "s", "s~", 2_000).unwrap();
        let ids: Vec<_> = found.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new"]);

        // Exactly at expiry counts as expired.
        assert!(sparks_in_range(&conn, "s", "s~", 6_000).unwrap().is_empty());
    }

    #[test]
    fn counts_and_reaping() {
        let conn = conn();
        insert_spark(&conn, "old", &draft(0), "s0000000000").unwrap();
        insert_spark(&conn, "new", &draft(5_000), "s0000000001").unwrap();

        let counts = count_sparks(&conn, 2_000).unwrap();
        assert_eq!(counts, SparkCounts { total: 2, active: 1 });

        assert_eq!(delete_expired(&conn, 2_000).unwrap(), 1);
        assert!(get_spark(&conn, "old").unwrap().is_none());
        assert!(get_spark(&conn, "new").unwrap().is_some());
    }
}
