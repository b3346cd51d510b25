// Database schema: table creation.
//
// A `schema_version` table records which schema the file was created with.
// This mirrors `migrations/postgres/0001_initial.sql`; later changes get a new
// version row and their own statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent, safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Sparks: immutable content plus a single mutable counter
        CREATE TABLE IF NOT EXISTS sparks (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            photo_url TEXT,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            geohash TEXT NOT NULL,             -- precision 10, derived from coordinates
            created_at_ms INTEGER NOT NULL,    -- epoch millis, store clock
            expires_at_ms INTEGER NOT NULL,    -- created_at_ms + 48h
            warmed_count INTEGER NOT NULL DEFAULT 0 CHECK (warmed_count >= 0),
            version INTEGER NOT NULL DEFAULT 0 -- bumped by every warm
        );

        -- Range scans for proximity queries
        CREATE INDEX IF NOT EXISTS idx_sparks_geohash
            ON sparks(geohash);

        -- Reaping and active counts
        CREATE INDEX IF NOT EXISTS idx_sparks_expiry
            ON sparks(expires_at_ms);
        ",
    )
    .context("Failed to create database tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Count the number of user tables (for `sparkdrop init` output).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
