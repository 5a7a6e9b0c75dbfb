//! The per-URL pointer table (spec §3's Cache entry, invariants E1–E4).

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::PageType;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub entry_id: i64,
    pub original_url: String,
    pub normalized_url: String,
    pub url_hash: String,
    pub source_site: String,
    pub page_type: PageType,
    pub is_valid: bool,
    pub cache_hits: u64,
    pub first_cached_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub content_id: Option<i64>,
}

pub fn find_valid_by_url_hash(
    conn: &Connection,
    url_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<CacheEntry>, StoreError> {
    conn.query_row(
        "SELECT entry_id, original_url, normalized_url, url_hash, source_site, page_type,
                is_valid, cache_hits, first_cached_at, last_accessed_at, expires_at, content_id
         FROM cache_entries
         WHERE url_hash = ?1 AND is_valid = 1 AND expires_at > ?2",
        params![url_hash, now],
        row_to_entry,
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn find_by_url_hash(conn: &Connection, url_hash: &str) -> Result<Option<CacheEntry>, StoreError> {
    conn.query_row(
        "SELECT entry_id, original_url, normalized_url, url_hash, source_site, page_type,
                is_valid, cache_hits, first_cached_at, last_accessed_at, expires_at, content_id
         FROM cache_entries WHERE url_hash = ?1",
        params![url_hash],
        row_to_entry,
    )
    .optional()
    .map_err(StoreError::from)
}

/// Upsert keyed by the unique `url_hash` (spec §4.3 step 6): insert sets
/// `first_cached_at = last_accessed_at = now`; conflict refreshes
/// `content_id`, `expires_at`, `last_accessed_at`, and flips `is_valid` back
/// to true.
pub fn upsert(
    conn: &Connection,
    original_url: &str,
    normalized_url: &str,
    url_hash: &str,
    source_site: &str,
    page_type: PageType,
    content_id: i64,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO cache_entries
            (original_url, normalized_url, url_hash, source_site, page_type,
             is_valid, cache_hits, first_cached_at, last_accessed_at, expires_at, content_id)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6, ?6, ?7, ?8)
         ON CONFLICT(url_hash) DO UPDATE SET
            content_id = excluded.content_id,
            expires_at = excluded.expires_at,
            last_accessed_at = excluded.last_accessed_at,
            is_valid = 1",
        params![
            original_url,
            normalized_url,
            url_hash,
            source_site,
            page_type.as_str(),
            now,
            expires_at,
            content_id,
        ],
    )?;

    find_by_url_hash(conn, url_hash)?
        .map(|e| e.entry_id)
        .ok_or_else(|| StoreError("upsert did not produce a row".to_string()))
}

/// Increment `cache_hits` and refresh `last_accessed_at` on a hit (spec
/// §4.3 Lookup step 3).
pub fn record_hit(conn: &Connection, entry_id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE cache_entries SET cache_hits = cache_hits + 1, last_accessed_at = ?2
         WHERE entry_id = ?1",
        params![entry_id, now],
    )?;
    Ok(())
}

pub fn invalidate(conn: &Connection, entry_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE cache_entries SET is_valid = 0 WHERE entry_id = ?1",
        params![entry_id],
    )?;
    Ok(())
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    let page_type_text: String = row.get(5)?;
    Ok(CacheEntry {
        entry_id: row.get(0)?,
        original_url: row.get(1)?,
        normalized_url: row.get(2)?,
        url_hash: row.get(3)?,
        source_site: row.get(4)?,
        page_type: PageType::parse(&page_type_text).unwrap_or(PageType::Detail),
        is_valid: row.get(6)?,
        cache_hits: row.get::<_, i64>(7)? as u64,
        first_cached_at: row.get(8)?,
        last_accessed_at: row.get(9)?,
        expires_at: row.get(10)?,
        content_id: row.get(11)?,
    })
}
