//! End-to-end tests exercising the full fetch pipeline through the public
//! `Harvester` API: canonicalize -> lookup -> admit -> driver.fetch -> store.
//!
//! Mirrors `webfetch/tests/integration.rs`'s black-box style, but swaps its
//! `wiremock` HTTP mock server for a hand-written `Driver` fake: this crate
//! has no transport of its own to mock, only the trait boundary the caller
//! supplies (spec.md §6's driver interface).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use harvest::canonical;
use harvest::config::{AllowListConfig, CacheConfig, HarvesterConfig, PageType, RateLimitConfig};
use harvest::driver::{Driver, DriverError, DriverResponse};
use harvest::Harvester;
use tokio_util::sync::CancellationToken;

struct ScriptedDriver {
    calls: AtomicUsize,
    body: Mutex<Vec<u8>>,
}

impl ScriptedDriver {
    fn returning(body: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            body: Mutex::new(body.into()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn fetch(&self, _url: &str) -> Result<DriverResponse, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DriverResponse {
            http_status: 200,
            body: self.body.lock().unwrap().clone(),
            duration_ms: 5,
        })
    }
}

fn test_config(cache_root: &std::path::Path) -> HarvesterConfig {
    let mut config = HarvesterConfig::new(":memory:", cache_root);
    config.rate_limits = vec![("t".to_string(), RateLimitConfig::new(3, 2))];
    config.allow_list = AllowListConfig::with_defaults();
    config.cache = CacheConfig::default();
    config
}

fn harvester(cache_root: &std::path::Path) -> Harvester {
    let clock: Arc<dyn harvest::clock::Clock> = Arc::new(harvest::clock::ManualClock::new(chrono::Utc::now()));
    Harvester::open_in_memory(test_config(cache_root), clock).expect("in-memory harvester")
}

/// Scenario 1: canonical collapse.
#[test]
fn canonical_collapse_scenario() {
    let allow_list = AllowListConfig::with_defaults();
    let a = canonical::canonicalize(
        "HTTPS://WWW.A.JP/Kodate/12345/?bukkenNo=9&utm=x",
        "athome",
        &allow_list,
    );
    let b = canonical::canonicalize(
        "https://www.a.jp/Kodate/12345?bukkenNo=9",
        "athome",
        &allow_list,
    );
    assert_eq!(a.normalized_url, b.normalized_url);
    assert_eq!(a.url_hash, b.url_hash);
}

/// Scenario 3: cache round-trip.
#[tokio::test]
async fn cache_round_trip_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let harvester = harvester(dir.path());
    let driver = ScriptedDriver::returning(&b"<html/>"[..]);
    let coordinator = harvester.coordinator(driver.clone());
    let cancel = CancellationToken::new();

    let first = coordinator
        .fetch("https://example.com/listing?id=1", "t", PageType::Detail, &cancel)
        .await
        .expect("first fetch");
    assert!(!first.from_cache);

    let second = coordinator
        .fetch("https://example.com/listing?id=1", "t", PageType::Detail, &cancel)
        .await
        .expect("second fetch");
    assert!(second.from_cache);
    assert_eq!(second.body, b"<html/>");

    assert_eq!(driver.call_count(), 1);
    let stats = harvester.cache().stats().unwrap();
    assert_eq!(stats.today.cache_hits, 1);
}

/// Scenario 4: dedup — two distinct URLs, identical bodies, one file.
#[tokio::test]
async fn dedup_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let harvester = harvester(dir.path());
    let driver = ScriptedDriver::returning(&b"same body"[..]);
    let coordinator = harvester.coordinator(driver);
    let cancel = CancellationToken::new();

    coordinator
        .fetch("https://example.com/a?id=1", "t", PageType::Detail, &cancel)
        .await
        .unwrap();
    coordinator
        .fetch("https://example.com/a?id=2", "t", PageType::Detail, &cancel)
        .await
        .unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1, "two aliased bodies must share one blob on disk");

    assert!(
        harvester
            .cache()
            .lookup("https://example.com/a?id=1", "t")
            .is_some()
    );
    assert!(
        harvester
            .cache()
            .lookup("https://example.com/a?id=2", "t")
            .is_some()
    );
}

/// Scenario 5: file-gone drift repair.
#[tokio::test]
async fn file_gone_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let harvester = harvester(dir.path());
    let driver = ScriptedDriver::returning(&b"body"[..]);
    let coordinator = harvester.coordinator(driver);
    let cancel = CancellationToken::new();

    coordinator
        .fetch("https://example.com/a?id=1", "t", PageType::Detail, &cancel)
        .await
        .unwrap();

    for entry in std::fs::read_dir(dir.path()).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    assert!(harvester.cache().lookup("https://example.com/a?id=1", "t").is_none());

    let cleaned = harvester.cache().cleanup().unwrap();
    assert!(cleaned.entries_invalidated >= 1);
}

/// Scenario 2: budget stall — the limiter denies admission once the
/// window's budget is exhausted, and the coordinator surfaces no body
/// rather than blocking forever (a cancellation token keeps this test
/// bounded instead of waiting out the real window).
#[tokio::test]
async fn budget_stall_denies_once_window_is_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let harvester = harvester(dir.path());
    let limiter = harvester.limiter();

    for i in 0..3 {
        let probe = limiter.can_admit("t").unwrap();
        assert!(probe.allowed, "request {i} should still be within budget");
        limiter.record("t", harvest::limiter::RequestStatus::Success, Some(5), None, false);
    }

    let probe = limiter.can_admit("t").unwrap();
    assert!(!probe.allowed, "4th request must stall until the window rolls over");
    assert!(probe.wait_seconds > 0.0);

    let driver = ScriptedDriver::returning(&b"never reached before wait"[..]);
    let coordinator = harvester.coordinator(driver.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = coordinator
        .fetch("https://example.com/blocked?id=9", "t", PageType::Detail, &cancel)
        .await;
    assert!(outcome.is_none(), "cancelled admission must not produce a body");
    assert_eq!(driver.call_count(), 0, "driver must not be called before admission");
}

/// Scenario 6: LRU eviction under a tight size bound.
#[tokio::test]
async fn lru_eviction_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cache.max_cache_size_mb = 1;
    config.cache.lru_target_fraction = 0.8;
    let clock = harvest::clock::ManualClock::new(chrono::Utc::now());
    let clock_handle: Arc<dyn harvest::clock::Clock> = Arc::new(clock.clone());
    let harvester = Harvester::open_in_memory(config, clock_handle).unwrap();

    let body = vec![b'x'; 200 * 1024];
    for i in 0..10 {
        let driver = ScriptedDriver::returning(body.clone());
        let coordinator = harvester.coordinator(driver);
        let cancel = CancellationToken::new();
        coordinator
            .fetch(&format!("https://example.com/p?id={i}"), "t", PageType::Detail, &cancel)
            .await
            .unwrap();
        clock.advance(std::time::Duration::from_secs(1));
    }

    let cleaned = harvester.cache().cleanup().unwrap();
    assert!(cleaned.files_deleted > 0, "oldest entries must be evicted");

    let remaining_bytes: u64 = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum();
    assert!(
        remaining_bytes <= (1024 * 1024) * 8 / 10,
        "cleanup must leave at most 80% of the size bound on disk, left {remaining_bytes}"
    );
}

/// Scenario: a distinct body under a different page type gets its own TTL,
/// and advancing the clock past it turns a hit into a miss (spec §8 P7).
#[tokio::test]
async fn ttl_expiry_turns_hit_into_miss() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cache.ttl.detail = std::time::Duration::from_secs(1);
    let clock = harvest::clock::ManualClock::new(chrono::Utc::now());
    let clock_handle: Arc<dyn harvest::clock::Clock> = Arc::new(clock.clone());
    let harvester = Harvester::open_in_memory(config, clock_handle).unwrap();
    let driver = ScriptedDriver::returning(&b"ttl body"[..]);
    let coordinator = harvester.coordinator(driver);
    let cancel = CancellationToken::new();

    coordinator
        .fetch("https://example.com/p?id=1", "t", PageType::Detail, &cancel)
        .await
        .unwrap();
    assert!(harvester.cache().lookup("https://example.com/p?id=1", "t").is_some());

    clock.advance(std::time::Duration::from_secs(2));
    assert!(harvester.cache().lookup("https://example.com/p?id=1", "t").is_none());
}
