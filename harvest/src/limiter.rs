//! Per-site sliding-window admission controller (spec §4.2).
//!
//! Backed by the `request_events` append-only table; the only coordination
//! between concurrent callers is that shared table (R2), so admission stays
//! correct across threads, tasks, and processes sharing one database file.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::StoreError;

/// Outcome of an attempted outbound fetch, recorded after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Success,
    Failed,
    Timeout,
}

impl RequestStatus {
    fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Failed => "failed",
            RequestStatus::Timeout => "timeout",
        }
    }
}

/// Outcome of a (possibly blocking) `admit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted { slept: bool },
    Cancelled,
}

/// Result of a non-blocking admission probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmitProbe {
    pub allowed: bool,
    pub wait_seconds: f64,
}

/// Aggregate counters for a site's trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterStats {
    pub budget: u32,
    pub period_seconds: u32,
    pub in_window: u32,
    pub failed: u32,
    pub cached_in_window: u32,
    pub avg_response_ms: Option<f64>,
    pub remaining: i64,
}

pub struct RateLimiter {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, clock: Arc<dyn Clock>) -> Self {
        Self { conn, clock }
    }

    /// Block the caller until `site_name` admits a new request, or until
    /// `cancel` fires. On cancellation, returns `Ok(AdmitOutcome::Cancelled)`
    /// without recording an event (R4).
    pub async fn admit(
        &self,
        site_name: &str,
        cancel: &CancellationToken,
    ) -> Result<AdmitOutcome, StoreError> {
        let mut slept = false;
        loop {
            let probe = self.can_admit(site_name)?;
            if probe.allowed {
                return Ok(AdmitOutcome::Admitted { slept });
            }

            let wait = Duration::from_secs_f64(probe.wait_seconds.max(0.01));
            debug!(site = site_name, wait_seconds = probe.wait_seconds, "rate limit: waiting for admission slot");
            slept = true;

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = cancel.cancelled() => return Ok(AdmitOutcome::Cancelled),
            }
            // Re-poll: R3, another process may have consumed the slot.
        }
    }

    /// Non-blocking probe: is `site_name` admitted right now, and if not,
    /// how long until it is.
    pub fn can_admit(&self, site_name: &str) -> Result<AdmitProbe, StoreError> {
        let conn = self.conn.lock().expect("rate limiter connection poisoned");
        let now = self.clock.now();

        let config = get_config(&conn, site_name)?;
        let (max_requests, period_seconds) = match config {
            Some(c) => c,
            None => {
                warn!(site = site_name, "rate limiter: no config for site, admitting unconditionally");
                return Ok(AdmitProbe {
                    allowed: true,
                    wait_seconds: 0.0,
                });
            }
        };

        let window_start = now - chrono::Duration::seconds(i64::from(period_seconds));
        let count: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM request_events
                 WHERE site_name = ?1 AND request_timestamp >= ?2
                   AND status = 'success' AND from_cache = 0",
                params![site_name, window_start],
                |row| row.get(0),
            )?;

        if count < max_requests {
            return Ok(AdmitProbe {
                allowed: true,
                wait_seconds: 0.0,
            });
        }

        let oldest: Option<DateTime<Utc>> = conn
            .query_row(
                "SELECT request_timestamp FROM request_events
                 WHERE site_name = ?1 AND request_timestamp >= ?2
                   AND status = 'success' AND from_cache = 0
                 ORDER BY request_timestamp ASC LIMIT 1",
                params![site_name, window_start],
                |row| row.get(0),
            )
            .optional()?;

        let wait_seconds = match oldest {
            Some(oldest) => {
                let free_at = oldest + chrono::Duration::seconds(i64::from(period_seconds));
                (free_at - now).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0,
        };

        Ok(AdmitProbe {
            allowed: wait_seconds <= 0.0,
            wait_seconds,
        })
    }

    /// Append a request event. Never fails the caller's operation on a
    /// storage error; logs and swallows instead, since a missed event only
    /// under-counts the budget (fails open, never closed).
    pub fn record(
        &self,
        site_name: &str,
        status: RequestStatus,
        response_time_ms: Option<u32>,
        error_message: Option<&str>,
        from_cache: bool,
    ) {
        if let Err(err) = self.try_record(site_name, status, response_time_ms, error_message, from_cache) {
            warn!(site = site_name, error = %err, "rate limiter: failed to record request event");
        }
    }

    fn try_record(
        &self,
        site_name: &str,
        status: RequestStatus,
        response_time_ms: Option<u32>,
        error_message: Option<&str>,
        from_cache: bool,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("rate limiter connection poisoned");
        let now = self.clock.now();
        conn.execute(
            "INSERT INTO request_events
                (site_name, request_timestamp, response_time_ms, status, error_message, from_cache)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                site_name,
                now,
                response_time_ms,
                status.as_str(),
                error_message,
                from_cache,
            ],
        )?;
        Ok(())
    }

    /// Aggregate counters over the trailing window for `site_name`.
    pub fn stats(&self, site_name: &str) -> Result<LimiterStats, StoreError> {
        let conn = self.conn.lock().expect("rate limiter connection poisoned");
        let now = self.clock.now();

        let (max_requests, period_seconds) =
            get_config(&conn, site_name)?.unwrap_or((0, 0));
        let window_start = now - chrono::Duration::seconds(i64::from(period_seconds));

        let in_window: u32 = conn.query_row(
            "SELECT COUNT(*) FROM request_events
             WHERE site_name = ?1 AND request_timestamp >= ?2
               AND status = 'success' AND from_cache = 0",
            params![site_name, window_start],
            |row| row.get(0),
        )?;
        let failed: u32 = conn.query_row(
            "SELECT COUNT(*) FROM request_events
             WHERE site_name = ?1 AND request_timestamp >= ?2 AND status = 'failed'",
            params![site_name, window_start],
            |row| row.get(0),
        )?;
        let cached_in_window: u32 = conn.query_row(
            "SELECT COUNT(*) FROM request_events
             WHERE site_name = ?1 AND request_timestamp >= ?2 AND from_cache = 1",
            params![site_name, window_start],
            |row| row.get(0),
        )?;
        let avg_response_ms: Option<f64> = conn.query_row(
            "SELECT AVG(response_time_ms) FROM request_events
             WHERE site_name = ?1 AND request_timestamp >= ?2
               AND status = 'success' AND from_cache = 0",
            params![site_name, window_start],
            |row| row.get(0),
        )?;

        Ok(LimiterStats {
            budget: max_requests,
            period_seconds,
            in_window,
            failed,
            cached_in_window,
            avg_response_ms,
            remaining: (i64::from(max_requests) - i64::from(in_window)).max(0),
        })
    }
}

fn get_config(conn: &Connection, site_name: &str) -> Result<Option<(u32, u32)>, StoreError> {
    conn.query_row(
        "SELECT max_requests, period_seconds FROM rate_limits WHERE site_name = ?1",
        params![site_name],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitConfig;
    use crate::schema::open_in_memory;

    fn limiter_with(clock: ManualClock, cfg: RateLimitConfig) -> RateLimiter {
        let conn = open_in_memory(&[("t".to_string(), cfg)]).expect("open db");
        RateLimiter::new(Arc::new(Mutex::new(conn)), Arc::new(clock))
    }

    #[test]
    fn admits_until_budget_exhausted_then_denies() {
        let clock = ManualClock::new(Utc::now());
        let limiter = limiter_with(clock.clone(), RateLimitConfig::new(3, 2));

        for _ in 0..3 {
            let probe = limiter.can_admit("t").unwrap();
            assert!(probe.allowed);
            limiter.record("t", RequestStatus::Success, Some(10), None, false);
        }

        let probe = limiter.can_admit("t").unwrap();
        assert!(!probe.allowed);
        assert!(probe.wait_seconds > 0.0);
    }

    #[test]
    fn cache_hits_and_failures_do_not_consume_budget() {
        let clock = ManualClock::new(Utc::now());
        let limiter = limiter_with(clock, RateLimitConfig::new(1, 60));

        for _ in 0..10 {
            limiter.record("t", RequestStatus::Success, Some(5), None, true);
        }
        for _ in 0..10 {
            limiter.record("t", RequestStatus::Failed, None, Some("boom"), false);
        }

        assert!(limiter.can_admit("t").unwrap().allowed);
    }

    #[test]
    fn window_rolls_forward_as_clock_advances() {
        let clock = ManualClock::new(Utc::now());
        let limiter = limiter_with(clock.clone(), RateLimitConfig::new(1, 2));

        limiter.record("t", RequestStatus::Success, Some(5), None, false);
        assert!(!limiter.can_admit("t").unwrap().allowed);

        clock.advance(Duration::from_secs(3));
        assert!(limiter.can_admit("t").unwrap().allowed);
    }

    #[test]
    fn unconfigured_site_is_admitted_unconditionally() {
        let clock = ManualClock::new(Utc::now());
        let conn = open_in_memory(&[]).expect("open db");
        let limiter = RateLimiter::new(Arc::new(Mutex::new(conn)), Arc::new(clock));

        assert!(limiter.can_admit("unknown-site").unwrap().allowed);
    }

    #[tokio::test]
    async fn admit_honors_cancellation_without_recording() {
        let clock = ManualClock::new(Utc::now());
        let limiter = limiter_with(clock, RateLimitConfig::new(1, 3600));
        limiter.record("t", RequestStatus::Success, Some(5), None, false);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = limiter.admit("t", &cancel).await.unwrap();
        assert_eq!(outcome, AdmitOutcome::Cancelled);
    }
}
