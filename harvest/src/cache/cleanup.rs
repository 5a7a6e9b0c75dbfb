//! Compound cache maintenance (spec §4.3's Cleanup).
//!
//! Seven ordered phases. Safe to run concurrently with lookups and stores:
//! cleanup only invalidates and then garbage-collects, it never hands out a
//! dangling pointer (phase ordering 3→4→6 re-establishes C2 before any
//! content row is removed).

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::cache::content;
use crate::cache::stats;
use crate::config::CacheConfig;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub entries_invalidated: u64,
    pub files_deleted: u64,
    pub bytes_freed: u64,
}

pub fn cleanup(
    conn: &Connection,
    cache_root: &Path,
    config: &CacheConfig,
    now: DateTime<Utc>,
) -> Result<CleanupStats, StoreError> {
    let mut result = CleanupStats::default();

    // Phase 1: expire.
    let expired = expire(conn, now)?;
    result.entries_invalidated += expired;

    // Phase 2: snapshot valid fileUuid set.
    let valid = snapshot_valid_uuids(conn)?;

    // Phase 3: orphan sweep.
    let (orphan_files, orphan_bytes) = orphan_sweep(cache_root, &valid)?;
    result.files_deleted += orphan_files;
    result.bytes_freed += orphan_bytes;

    // Phase 4: age sweep.
    let (age_files, age_bytes, age_invalidated) = age_sweep(conn, cache_root, &valid, config, now)?;
    result.files_deleted += age_files;
    result.bytes_freed += age_bytes;
    result.entries_invalidated += age_invalidated;

    // Phase 5: size-bound LRU sweep.
    let (lru_files, lru_bytes, lru_invalidated) = lru_sweep(conn, cache_root, config)?;
    result.files_deleted += lru_files;
    result.bytes_freed += lru_bytes;
    result.entries_invalidated += lru_invalidated;

    // Phase 6: referential compact.
    referential_compact(conn)?;

    // Phase 7: record stats.
    stats::record_expired(conn, now, expired)?;
    stats::record_invalidated(conn, now, result.entries_invalidated - expired)?;
    stats::record_cleanup(conn, now, result.entries_invalidated, result.files_deleted)?;

    Ok(result)
}

fn expire(conn: &Connection, now: DateTime<Utc>) -> Result<u64, StoreError> {
    let changed = conn.execute(
        "UPDATE cache_entries SET is_valid = 0 WHERE expires_at < ?1 AND is_valid = 1",
        params![now],
    )?;
    Ok(changed as u64)
}

fn snapshot_valid_uuids(conn: &Connection) -> Result<HashSet<Uuid>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT cr.file_uuid
         FROM cache_entries ce JOIN content_records cr ON ce.content_id = cr.cache_id
         WHERE ce.is_valid = 1",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut set = HashSet::new();
    for row in rows {
        if let Ok(uuid) = row?.parse() {
            set.insert(uuid);
        }
    }
    Ok(set)
}

fn orphan_sweep(cache_root: &Path, valid: &HashSet<Uuid>) -> Result<(u64, u64), StoreError> {
    let mut files_deleted = 0u64;
    let mut bytes_freed = 0u64;

    let entries = match std::fs::read_dir(cache_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if path.extension().and_then(|e| e.to_str()) != Some("html") {
            continue;
        }
        let Ok(uuid) = stem.parse::<Uuid>() else {
            continue;
        };
        if valid.contains(&uuid) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        std::fs::remove_file(&path)?;
        files_deleted += 1;
        bytes_freed += size;
    }

    Ok((files_deleted, bytes_freed))
}

fn age_sweep(
    conn: &Connection,
    cache_root: &Path,
    valid: &HashSet<Uuid>,
    config: &CacheConfig,
    now: DateTime<Utc>,
) -> Result<(u64, u64, u64), StoreError> {
    let cutoff = now - chrono::Duration::days(i64::from(config.cleanup_age_days));
    let mut files_deleted = 0u64;
    let mut bytes_freed = 0u64;
    let mut invalidated = 0u64;

    for uuid in valid {
        let path = content::blob_path(cache_root, *uuid);
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified: DateTime<Utc> = modified.into();
        if modified >= cutoff {
            continue;
        }

        bytes_freed += metadata.len();
        std::fs::remove_file(&path)?;
        files_deleted += 1;

        invalidated += invalidate_entries_for_uuid(conn, *uuid)?;
    }

    Ok((files_deleted, bytes_freed, invalidated))
}

fn lru_sweep(
    conn: &Connection,
    cache_root: &Path,
    config: &CacheConfig,
) -> Result<(u64, u64, u64), StoreError> {
    let max_bytes = config.max_cache_size_mb * 1024 * 1024;
    let target_bytes = (max_bytes as f64 * config.lru_target_fraction) as u64;

    let mut total_bytes = current_total_bytes(cache_root)?;
    if total_bytes <= max_bytes {
        return Ok((0, 0, 0));
    }

    let mut stmt = conn.prepare(
        "SELECT ce.entry_id, cr.file_uuid
         FROM cache_entries ce JOIN content_records cr ON ce.content_id = cr.cache_id
         WHERE ce.is_valid = 1
         ORDER BY ce.last_accessed_at ASC",
    )?;
    let rows: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut files_deleted = 0u64;
    let mut bytes_freed = 0u64;
    let mut invalidated = 0u64;

    for (entry_id, uuid_text) in rows {
        if total_bytes <= target_bytes {
            break;
        }
        let Ok(uuid) = uuid_text.parse::<Uuid>() else {
            continue;
        };
        let path = content::blob_path(cache_root, uuid);
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        if content::delete_blob(cache_root, uuid).is_ok() && size > 0 {
            files_deleted += 1;
            bytes_freed += size;
            total_bytes = total_bytes.saturating_sub(size);
        }

        conn.execute(
            "UPDATE cache_entries SET is_valid = 0 WHERE entry_id = ?1",
            params![entry_id],
        )?;
        invalidated += 1;
    }

    Ok((files_deleted, bytes_freed, invalidated))
}

fn current_total_bytes(cache_root: &Path) -> Result<u64, StoreError> {
    let entries = match std::fs::read_dir(cache_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut total = 0u64;
    for entry in entries {
        let entry = entry?;
        total += entry.metadata().map(|m| m.len()).unwrap_or(0);
    }
    Ok(total)
}

fn invalidate_entries_for_uuid(conn: &Connection, uuid: Uuid) -> Result<u64, StoreError> {
    let changed = conn.execute(
        "UPDATE cache_entries SET is_valid = 0
         WHERE is_valid = 1 AND content_id IN (
             SELECT cache_id FROM content_records WHERE file_uuid = ?1
         )",
        params![uuid.to_string()],
    )?;
    Ok(changed as u64)
}

fn referential_compact(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM cache_entries
         WHERE content_id IS NOT NULL
           AND content_id NOT IN (SELECT cache_id FROM content_records)",
        [],
    )?;
    conn.execute(
        "DELETE FROM content_records
         WHERE cache_id NOT IN (
             SELECT content_id FROM cache_entries WHERE is_valid = 1 AND content_id IS NOT NULL
         )",
        [],
    )?;
    Ok(())
}
