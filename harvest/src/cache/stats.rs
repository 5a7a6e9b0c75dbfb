//! Daily cache statistics (spec §3's Daily cache stats), upserted per UTC
//! date with an increment-on-conflict pattern.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyCounters {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_expired: u64,
    pub cache_invalidated: u64,
    pub entries_cleaned: u64,
    pub files_cleaned: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub total_entries: u64,
    pub file_bytes: u64,
    pub today: DailyCounters,
    pub hit_rate: f64,
}

fn bump(conn: &Connection, date: NaiveDate, column: &str, by: u64) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO daily_cache_stats (stat_date, {column}) VALUES (?1, ?2)
         ON CONFLICT(stat_date) DO UPDATE SET {column} = {column} + excluded.{column}"
    );
    conn.execute(&sql, params![date, by as i64])?;
    Ok(())
}

pub fn record_hit(conn: &Connection, now: DateTime<Utc>) -> Result<(), StoreError> {
    bump(conn, now.date_naive(), "total_requests", 1)?;
    bump(conn, now.date_naive(), "cache_hits", 1)
}

pub fn record_miss(conn: &Connection, now: DateTime<Utc>) -> Result<(), StoreError> {
    bump(conn, now.date_naive(), "total_requests", 1)?;
    bump(conn, now.date_naive(), "cache_misses", 1)
}

pub fn record_expired(conn: &Connection, now: DateTime<Utc>, count: u64) -> Result<(), StoreError> {
    bump(conn, now.date_naive(), "cache_expired", count)
}

pub fn record_invalidated(conn: &Connection, now: DateTime<Utc>, count: u64) -> Result<(), StoreError> {
    bump(conn, now.date_naive(), "cache_invalidated", count)
}

pub fn record_cleanup(
    conn: &Connection,
    now: DateTime<Utc>,
    entries_cleaned: u64,
    files_cleaned: u64,
) -> Result<(), StoreError> {
    bump(conn, now.date_naive(), "entries_cleaned", entries_cleaned)?;
    bump(conn, now.date_naive(), "files_cleaned", files_cleaned)
}

pub fn today(conn: &Connection, now: DateTime<Utc>) -> Result<DailyCounters, StoreError> {
    conn.query_row(
        "SELECT total_requests, cache_hits, cache_misses, cache_expired,
                cache_invalidated, entries_cleaned, files_cleaned
         FROM daily_cache_stats WHERE stat_date = ?1",
        params![now.date_naive()],
        |row| {
            Ok(DailyCounters {
                total_requests: row.get::<_, i64>(0)? as u64,
                cache_hits: row.get::<_, i64>(1)? as u64,
                cache_misses: row.get::<_, i64>(2)? as u64,
                cache_expired: row.get::<_, i64>(3)? as u64,
                cache_invalidated: row.get::<_, i64>(4)? as u64,
                entries_cleaned: row.get::<_, i64>(5)? as u64,
                files_cleaned: row.get::<_, i64>(6)? as u64,
            })
        },
    )
    .optional()
    .map(Option::unwrap_or_default)
    .map_err(StoreError::from)
}
