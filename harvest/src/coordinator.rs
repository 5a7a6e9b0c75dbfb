//! Fetch Coordinator (spec §4.4): the thin façade composing the
//! canonicalizer, the rate limiter, the cache, and the caller-supplied
//! driver.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::Cache;
use crate::config::PageType;
use crate::driver::{Driver, DriverError};
use crate::limiter::{AdmitOutcome, RateLimiter, RequestStatus};

/// One fetch outcome as handed back to the caller. Permanent failures
/// (timeout, transport error) come back as `None` — the coordinator never
/// raises for either (spec §4.4's contract).
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub body: Vec<u8>,
    pub from_cache: bool,
}

pub struct FetchCoordinator {
    cache: Cache,
    limiter: RateLimiter,
    driver: Arc<dyn Driver>,
}

impl FetchCoordinator {
    pub(crate) fn new(cache: Cache, limiter: RateLimiter, driver: Arc<dyn Driver>) -> Self {
        Self {
            cache,
            limiter,
            driver,
        }
    }

    /// lookup -> (if miss) admit -> driver.fetch -> store -> record.
    /// Attempts `url` exactly once; retry policy is the caller's concern.
    pub async fn fetch(
        &self,
        url: &str,
        site_name: &str,
        page_type: PageType,
        cancel: &CancellationToken,
    ) -> Option<FetchOutcome> {
        if let Some(hit) = self.cache.lookup(url, site_name) {
            self.limiter
                .record(site_name, RequestStatus::Success, None, None, true);
            debug!(url, site_name, "fetch coordinator: served from cache");
            return Some(FetchOutcome {
                body: hit.body,
                from_cache: true,
            });
        }

        match self.limiter.admit(site_name, cancel).await {
            Ok(AdmitOutcome::Admitted { .. }) => {}
            Ok(AdmitOutcome::Cancelled) => return None,
            Err(err) => {
                // Storage error during admission: deny conservatively (§7).
                tracing::warn!(site_name, error = %err, "rate limiter unavailable, denying admission");
                return None;
            }
        }

        let started = std::time::Instant::now();
        match self.driver.fetch(url).await {
            Ok(response) => {
                let duration_ms = response.duration_ms.max(started.elapsed().as_millis() as u32);
                self.limiter.record(
                    site_name,
                    RequestStatus::Success,
                    Some(duration_ms),
                    None,
                    false,
                );
                self.cache.store(
                    url,
                    site_name,
                    page_type,
                    response.http_status,
                    &response.body,
                    None,
                    Some(duration_ms),
                );
                Some(FetchOutcome {
                    body: response.body,
                    from_cache: false,
                })
            }
            Err(DriverError::Timeout) => {
                self.limiter.record(site_name, RequestStatus::Timeout, None, None, false);
                None
            }
            Err(DriverError::Transport(message)) => {
                self.limiter
                    .record(site_name, RequestStatus::Failed, None, Some(&message), false);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{AllowListConfig, CacheConfig, RateLimitConfig};
    use crate::driver::DriverResponse;
    use crate::schema::open_in_memory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeDriver {
        calls: AtomicUsize,
        body: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl Driver for FakeDriver {
        async fn fetch(&self, _url: &str) -> Result<DriverResponse, DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DriverResponse {
                http_status: 200,
                body: self.body.clone(),
                duration_ms: 5,
            })
        }
    }

    fn coordinator_with(dir: &std::path::Path) -> (FetchCoordinator, Arc<FakeDriver>) {
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(ManualClock::new(chrono::Utc::now()));
        let conn = open_in_memory(&[("t".to_string(), RateLimitConfig::new(60, 60))]).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let cache = Cache::new(
            conn.clone(),
            dir.to_path_buf(),
            CacheConfig::default(),
            AllowListConfig::with_defaults(),
            clock.clone(),
        );
        let limiter = RateLimiter::new(conn, clock);
        let driver = Arc::new(FakeDriver {
            calls: AtomicUsize::new(0),
            body: b"<html/>".to_vec(),
        });
        (
            FetchCoordinator::new(cache, limiter, driver.clone()),
            driver,
        )
    }

    #[tokio::test]
    async fn second_fetch_of_same_url_is_served_from_cache_without_calling_the_driver() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, driver) = coordinator_with(dir.path());
        let cancel = CancellationToken::new();

        let first = coordinator
            .fetch("https://example.com/a?id=1", "t", PageType::Detail, &cancel)
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second = coordinator
            .fetch("https://example.com/a?id=1", "t", PageType::Detail, &cancel)
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.body, first.body);

        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    }
}
