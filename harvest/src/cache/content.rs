//! Content-addressed store: one row, and one `<uuid>.html` blob on disk, per
//! distinct body (spec §3's Content record, invariants C1–C3).

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    pub cache_id: i64,
    pub http_status: u16,
    pub file_uuid: Uuid,
    pub content_hash: String,
    pub size_bytes: u64,
    pub scraped_at: DateTime<Utc>,
    pub scraping_duration_ms: Option<u32>,
    pub parsed_data: Option<Vec<u8>>,
}

#[must_use]
pub fn sha256_hex(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn find_by_content_hash(
    conn: &Connection,
    content_hash: &str,
) -> Result<Option<ContentRecord>, StoreError> {
    conn.query_row(
        "SELECT cache_id, http_status, file_uuid, content_hash, size_bytes,
                scraped_at, scraping_duration_ms, parsed_data
         FROM content_records WHERE content_hash = ?1",
        params![content_hash],
        row_to_content_record,
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn find_by_id(conn: &Connection, cache_id: i64) -> Result<Option<ContentRecord>, StoreError> {
    conn.query_row(
        "SELECT cache_id, http_status, file_uuid, content_hash, size_bytes,
                scraped_at, scraping_duration_ms, parsed_data
         FROM content_records WHERE cache_id = ?1",
        params![cache_id],
        row_to_content_record,
    )
    .optional()
    .map_err(StoreError::from)
}

/// Insert a brand-new content record. Callers must have already written the
/// blob to disk (write-then-commit: §4.3's failure semantics).
pub fn insert(
    conn: &Connection,
    http_status: u16,
    file_uuid: Uuid,
    content_hash: &str,
    size_bytes: u64,
    scraped_at: DateTime<Utc>,
    scraping_duration_ms: Option<u32>,
    parsed_data: Option<&[u8]>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO content_records
            (http_status, file_uuid, content_hash, size_bytes, scraped_at, scraping_duration_ms, parsed_data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            http_status,
            file_uuid.to_string(),
            content_hash,
            size_bytes as i64,
            scraped_at,
            scraping_duration_ms,
            parsed_data,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete(conn: &Connection, cache_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM content_records WHERE cache_id = ?1",
        params![cache_id],
    )?;
    Ok(())
}

fn row_to_content_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentRecord> {
    let file_uuid_text: String = row.get(2)?;
    let file_uuid = file_uuid_text.parse().unwrap_or_else(|_| Uuid::nil());
    Ok(ContentRecord {
        cache_id: row.get(0)?,
        http_status: row.get(1)?,
        file_uuid,
        content_hash: row.get(3)?,
        size_bytes: row.get::<_, i64>(4)? as u64,
        scraped_at: row.get(5)?,
        scraping_duration_ms: row.get(6)?,
        parsed_data: row.get(7)?,
    })
}

pub fn blob_path(cache_root: &Path, file_uuid: Uuid) -> PathBuf {
    cache_root.join(format!("{file_uuid}.html"))
}

/// Write `body` to `<cache_root>/<file_uuid>.html`, atomically (temp file in
/// the same directory, then rename), matching the atomic-write discipline
/// used for other durable artifacts in this codebase.
pub fn write_blob(cache_root: &Path, file_uuid: Uuid, body: &[u8]) -> Result<(), StoreError> {
    std::fs::create_dir_all(cache_root)?;
    let path = blob_path(cache_root, file_uuid);

    let mut tmp = tempfile::NamedTempFile::new_in(cache_root)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| StoreError(e.to_string()))?;
    Ok(())
}

pub fn read_blob(cache_root: &Path, file_uuid: Uuid) -> std::io::Result<Vec<u8>> {
    std::fs::read(blob_path(cache_root, file_uuid))
}

pub fn delete_blob(cache_root: &Path, file_uuid: Uuid) -> std::io::Result<()> {
    match std::fs::remove_file(blob_path(cache_root, file_uuid)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Best-effort access-time touch, mirroring the source's `os.utime` touch on
/// a cache hit. Failure here is not a correctness issue and is ignored.
pub fn touch_blob(cache_root: &Path, file_uuid: Uuid) {
    let path = blob_path(cache_root, file_uuid);
    let now = std::time::SystemTime::now();
    let _ = filetime_touch(&path, now);
}

fn filetime_touch(path: &Path, when: std::time::SystemTime) -> std::io::Result<()> {
    // std has no direct utime API; reopening for append and flushing nudges
    // mtime on every platform this crate targets without a dedicated dep.
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(when)
}
