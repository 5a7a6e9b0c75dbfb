//! Multi-layer cache (spec §4.3): relational metadata and indexing, bodies
//! on the local filesystem as UUID-named files.

mod cleanup;
mod content;
mod entry;
mod stats;

pub use cleanup::CleanupStats;
pub use stats::{CacheStats, DailyCounters};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::canonical::{self, CanonicalUrl};
use crate::clock::Clock;
use crate::config::{AllowListConfig, CacheConfig, PageType};
use crate::error::StoreError;

/// A cache hit: the stored body plus whatever opaque `parsedData` was saved
/// alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub body: Vec<u8>,
    pub parsed_data: Option<Vec<u8>>,
}

pub struct Cache {
    conn: Arc<Mutex<Connection>>,
    cache_root: PathBuf,
    config: CacheConfig,
    allow_list: AllowListConfig,
    clock: Arc<dyn Clock>,
}

impl Cache {
    pub(crate) fn new(
        conn: Arc<Mutex<Connection>>,
        cache_root: PathBuf,
        config: CacheConfig,
        allow_list: AllowListConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            conn,
            cache_root,
            config,
            allow_list,
            clock,
        }
    }

    #[must_use]
    pub fn canonicalize(&self, url: &str, site_name: &str) -> CanonicalUrl {
        canonical::canonicalize(url, site_name, &self.allow_list)
    }

    /// Spec §4.3 Lookup. Never surfaces a storage error to the caller: a
    /// transient failure degrades to a miss (§7).
    pub fn lookup(&self, url: &str, site_name: &str) -> Option<CacheHit> {
        match self.try_lookup(url, site_name) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(url, site_name, error = %err, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn try_lookup(&self, url: &str, site_name: &str) -> Result<Option<CacheHit>, StoreError> {
        let canonical = self.canonicalize(url, site_name);
        let now = self.clock.now();
        let conn = self.conn.lock().expect("cache connection poisoned");

        let Some(cache_entry) = entry::find_valid_by_url_hash(&conn, &canonical.url_hash, now)? else {
            stats::record_miss(&conn, now)?;
            debug!(url_hash = %canonical.url_hash, "cache miss");
            return Ok(None);
        };

        let Some(content_id) = cache_entry.content_id else {
            entry::invalidate(&conn, cache_entry.entry_id)?;
            stats::record_miss(&conn, now)?;
            return Ok(None);
        };
        let Some(content_record) = content::find_by_id(&conn, content_id)? else {
            entry::invalidate(&conn, cache_entry.entry_id)?;
            stats::record_miss(&conn, now)?;
            return Ok(None);
        };

        entry::record_hit(&conn, cache_entry.entry_id, now)?;

        match content::read_blob(&self.cache_root, content_record.file_uuid) {
            Ok(body) => {
                content::touch_blob(&self.cache_root, content_record.file_uuid);
                stats::record_hit(&conn, now)?;
                debug!(url_hash = %canonical.url_hash, "cache hit");
                Ok(Some(CacheHit {
                    body,
                    parsed_data: content_record.parsed_data,
                }))
            }
            Err(io_err) => {
                // Drift: the DB points at a file that no longer exists.
                warn!(
                    file_uuid = %content_record.file_uuid,
                    error = %io_err,
                    "cache blob missing for valid entry, invalidating"
                );
                entry::invalidate(&conn, cache_entry.entry_id)?;
                stats::record_miss(&conn, now)?;
                Ok(None)
            }
        }
    }

    /// Spec §4.3 Store. Returns the content record's `cacheId`. A storage
    /// failure here is logged and skipped (§7): the caller's fetch already
    /// succeeded, so the miss is not re-surfaced, only the cache write is
    /// dropped.
    pub fn store(
        &self,
        url: &str,
        site_name: &str,
        page_type: PageType,
        http_status: u16,
        body: &[u8],
        parsed_data: Option<&[u8]>,
        duration_ms: Option<u32>,
    ) -> Option<i64> {
        match self.try_store(url, site_name, page_type, http_status, body, parsed_data, duration_ms) {
            Ok(cache_id) => Some(cache_id),
            Err(err) => {
                warn!(url, site_name, error = %err, "cache store failed, skipping");
                None
            }
        }
    }

    fn try_store(
        &self,
        url: &str,
        site_name: &str,
        page_type: PageType,
        http_status: u16,
        body: &[u8],
        parsed_data: Option<&[u8]>,
        duration_ms: Option<u32>,
    ) -> Result<i64, StoreError> {
        let canonical = self.canonicalize(url, site_name);
        let now = self.clock.now();
        let ttl = self.config.ttl.for_page_type(page_type);
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        let content_hash = content::sha256_hex(body);
        let conn = self.conn.lock().expect("cache connection poisoned");

        let content_id = if let Some(existing) = content::find_by_content_hash(&conn, &content_hash)? {
            debug!(content_hash = %content_hash, "content dedup hit, reusing existing blob");
            existing.cache_id
        } else {
            let file_uuid = Uuid::new_v4();
            content::write_blob(&self.cache_root, file_uuid, body)?;
            content::insert(
                &conn,
                http_status,
                file_uuid,
                &content_hash,
                body.len() as u64,
                now,
                duration_ms,
                parsed_data,
            )?
        };

        entry::upsert(
            &conn,
            &canonical.original_url,
            &canonical.normalized_url,
            &canonical.url_hash,
            site_name,
            page_type,
            content_id,
            now,
            expires_at,
        )?;

        Ok(content_id)
    }

    /// Spec §4.3 Cleanup: the ordered multi-phase maintenance operation.
    pub fn cleanup(&self) -> Result<CleanupStats, StoreError> {
        let now = self.clock.now();
        let conn = self.conn.lock().expect("cache connection poisoned");
        cleanup::cleanup(&conn, &self.cache_root, &self.config, now)
    }

    /// Spec §4.3 stats surface.
    pub fn stats(&self) -> Result<CacheStats, StoreError> {
        let now = self.clock.now();
        let conn = self.conn.lock().expect("cache connection poisoned");

        let total_entries = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE is_valid = 1",
            [],
            |row| row.get::<_, i64>(0),
        )? as u64;
        let file_bytes = directory_bytes(&self.cache_root);
        let today = stats::today(&conn, now)?;
        let hit_rate = if today.total_requests == 0 {
            0.0
        } else {
            today.cache_hits as f64 / today.total_requests as f64
        };

        Ok(CacheStats {
            total_entries,
            file_bytes,
            today,
            hit_rate,
        })
    }
}

fn directory_bytes(path: &std::path::Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{AllowListConfig, CacheConfig};
    use crate::schema::open_in_memory;
    use chrono::Utc;

    fn cache_with(clock: ManualClock, cache_root: PathBuf, config: CacheConfig) -> Cache {
        let conn = open_in_memory(&[]).expect("open db");
        Cache::new(
            Arc::new(Mutex::new(conn)),
            cache_root,
            config,
            AllowListConfig::with_defaults(),
            Arc::new(clock),
        )
    }

    #[test]
    fn round_trips_a_stored_body() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let cache = cache_with(clock, dir.path().to_path_buf(), CacheConfig::default());

        cache.store(
            "https://example.com/a?id=1",
            "default",
            PageType::Detail,
            200,
            b"<html/>",
            None,
            Some(12),
        );

        let hit = cache.lookup("https://example.com/a?id=1", "default").unwrap();
        assert_eq!(hit.body, b"<html/>");
        assert_eq!(cache.stats().unwrap().today.cache_hits, 1);
    }

    #[test]
    fn identical_bodies_dedup_to_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let cache = cache_with(clock, dir.path().to_path_buf(), CacheConfig::default());

        cache.store("https://example.com/a?id=1", "default", PageType::Detail, 200, b"same", None, None);
        cache.store("https://example.com/a?id=2", "default", PageType::Detail, 200, b"same", None, None);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert!(cache.lookup("https://example.com/a?id=1", "default").is_some());
        assert!(cache.lookup("https://example.com/a?id=2", "default").is_some());
    }

    #[test]
    fn ttl_expiry_turns_a_hit_into_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let mut config = CacheConfig::default();
        config.ttl.detail = std::time::Duration::from_secs(1);
        let cache = cache_with(clock.clone(), dir.path().to_path_buf(), config);

        cache.store("https://example.com/a?id=1", "default", PageType::Detail, 200, b"x", None, None);
        assert!(cache.lookup("https://example.com/a?id=1", "default").is_some());

        clock.advance(std::time::Duration::from_secs(2));
        assert!(cache.lookup("https://example.com/a?id=1", "default").is_none());
    }

    #[test]
    fn deleted_file_is_treated_as_a_miss_and_entry_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let cache = cache_with(clock, dir.path().to_path_buf(), CacheConfig::default());

        cache.store("https://example.com/a?id=1", "default", PageType::Detail, 200, b"x", None, None);
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }

        assert!(cache.lookup("https://example.com/a?id=1", "default").is_none());

        let removed = cache.cleanup().unwrap();
        assert_eq!(removed.files_deleted, 0);
    }

    #[test]
    fn cleanup_reclaims_orphan_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{}.html", Uuid::new_v4())), b"orphan").unwrap();

        let clock = ManualClock::new(Utc::now());
        let cache = cache_with(clock, dir.path().to_path_buf(), CacheConfig::default());

        let result = cache.cleanup().unwrap();
        assert_eq!(result.files_deleted, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
