//! Schema bootstrap and connection opening.
//!
//! One logical schema normalizing the two backing stores the source system
//! used (a relational content/entry store plus a separate sqlite rate
//! tracker) into a single database, per §9's Design Notes.

use std::path::Path;

use rusqlite::Connection;

use crate::config::RateLimitConfig;
use crate::error::HarvestError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS content_records (
    cache_id              INTEGER PRIMARY KEY AUTOINCREMENT,
    http_status           INTEGER NOT NULL,
    file_uuid             TEXT NOT NULL UNIQUE,
    content_hash          TEXT NOT NULL UNIQUE,
    size_bytes            INTEGER NOT NULL,
    scraped_at            TEXT NOT NULL,
    scraping_duration_ms  INTEGER,
    parsed_data           BLOB
);

CREATE TABLE IF NOT EXISTS cache_entries (
    entry_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    original_url     TEXT NOT NULL,
    normalized_url   TEXT NOT NULL UNIQUE,
    url_hash         TEXT NOT NULL UNIQUE,
    source_site      TEXT NOT NULL,
    page_type        TEXT NOT NULL CHECK (page_type IN ('list', 'detail', 'image')),
    is_valid         INTEGER NOT NULL DEFAULT 1,
    cache_hits       INTEGER NOT NULL DEFAULT 0,
    first_cached_at  TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL,
    expires_at       TEXT NOT NULL,
    content_id       INTEGER REFERENCES content_records(cache_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url_hash ON cache_entries(url_hash);
CREATE INDEX IF NOT EXISTS idx_cache_entries_content_id ON cache_entries(content_id);
CREATE INDEX IF NOT EXISTS idx_cache_entries_valid_accessed ON cache_entries(is_valid, last_accessed_at);

CREATE TABLE IF NOT EXISTS rate_limits (
    limit_id            INTEGER PRIMARY KEY AUTOINCREMENT,
    site_name           TEXT NOT NULL UNIQUE,
    max_requests        INTEGER NOT NULL DEFAULT 60,
    period_seconds      INTEGER NOT NULL DEFAULT 300,
    concurrent_limit    INTEGER NOT NULL DEFAULT 1,
    retry_after_seconds INTEGER NOT NULL DEFAULT 60,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS request_events (
    event_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    site_name         TEXT NOT NULL,
    request_timestamp TEXT NOT NULL,
    response_time_ms  INTEGER,
    status            TEXT NOT NULL CHECK (status IN ('success', 'failed', 'timeout')),
    error_message     TEXT,
    from_cache        INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_request_events_site_time ON request_events(site_name, request_timestamp DESC);

CREATE TABLE IF NOT EXISTS daily_cache_stats (
    stat_id           INTEGER PRIMARY KEY AUTOINCREMENT,
    stat_date         TEXT NOT NULL UNIQUE,
    total_requests    INTEGER NOT NULL DEFAULT 0,
    cache_hits        INTEGER NOT NULL DEFAULT 0,
    cache_misses      INTEGER NOT NULL DEFAULT 0,
    cache_expired     INTEGER NOT NULL DEFAULT 0,
    cache_invalidated INTEGER NOT NULL DEFAULT 0,
    entries_cleaned   INTEGER NOT NULL DEFAULT 0,
    files_cleaned     INTEGER NOT NULL DEFAULT 0
);
";

/// Open (creating if absent) the sqlite database at `path`, bootstrap the
/// schema, and seed `rate_limits` via `INSERT OR IGNORE` so an operator's
/// existing rows are never clobbered.
pub fn open_database(
    path: &Path,
    seed_rate_limits: &[(String, RateLimitConfig)],
) -> Result<Connection, HarvestError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)
        .map_err(|e| HarvestError::from(e).with_detail("path", path.display().to_string()))?;
    initialize(&conn, seed_rate_limits)?;
    Ok(conn)
}

/// Open an in-memory database, useful for tests.
pub fn open_in_memory(
    seed_rate_limits: &[(String, RateLimitConfig)],
) -> Result<Connection, HarvestError> {
    let conn = Connection::open_in_memory()?;
    initialize(&conn, seed_rate_limits)?;
    Ok(conn)
}

fn initialize(conn: &Connection, seed_rate_limits: &[(String, RateLimitConfig)]) -> Result<(), HarvestError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    conn.execute_batch(SCHEMA)?;
    seed_defaults(conn, seed_rate_limits)?;
    Ok(())
}

fn seed_defaults(conn: &Connection, seeds: &[(String, RateLimitConfig)]) -> Result<(), HarvestError> {
    let now = chrono::Utc::now();
    for (site_name, cfg) in seeds {
        conn.execute(
            "INSERT OR IGNORE INTO rate_limits
                (site_name, max_requests, period_seconds, concurrent_limit, retry_after_seconds, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                site_name,
                cfg.max_requests,
                cfg.period_seconds,
                cfg.concurrent_limit,
                cfg.retry_after_seconds,
                now,
            ],
        )?;
    }
    Ok(())
}
