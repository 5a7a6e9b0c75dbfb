//! A polite, resumable fetch-coordination engine for web-harvesting
//! workloads.
//!
//! Three subsystems compose behind [`Harvester`]: a deterministic URL
//! [`canonical`]izer, a per-site sliding-window [`limiter`], and a
//! split-store [`cache`] whose metadata lives in sqlite and whose bodies
//! live on the filesystem as UUID-named files. [`coordinator::FetchCoordinator`]
//! is the thin façade tying them to a caller-supplied [`driver::Driver`].
//!
//! HTML parsing, field extraction, a headless-browser driver, scoring, and
//! publishing are all out of scope: this crate only guarantees that a site
//! is fetched no faster than its budget, that fetched content is reused
//! across runs and URL aliases, and that the cache stays observable,
//! expirable, and bounded in size.

pub mod cache;
pub mod canonical;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod limiter;
mod schema;

use std::sync::{Arc, Mutex};

use cache::Cache;
use clock::{Clock, SystemClock};
use config::HarvesterConfig;
use coordinator::FetchCoordinator;
use driver::Driver;
use error::HarvestError;
use limiter::RateLimiter;

/// Owns the database connection and cache root for one engine instance, and
/// hands out the three subsystems (plus a ready-composed [`FetchCoordinator`])
/// against a single shared configuration.
pub struct Harvester {
    config: HarvesterConfig,
    conn: Arc<Mutex<rusqlite::Connection>>,
    clock: Arc<dyn Clock>,
}

impl Harvester {
    /// Open (creating if absent) the database at `config.database_path`,
    /// bootstrap the schema, and seed `config.rate_limits`. Fatal only if
    /// the database cannot be opened or the cache root cannot be created
    /// (spec §7: "fatal at startup only").
    pub fn open(config: HarvesterConfig) -> Result<Self, HarvestError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// As [`Harvester::open`], but with an injected clock — the seam tests
    /// use to make TTL expiry and rate-limit windows deterministic.
    pub fn open_with_clock(
        config: HarvesterConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HarvestError> {
        std::fs::create_dir_all(&config.cache_root)
            .map_err(|e| HarvestError::from(e).with_detail("cache_root", config.cache_root.display().to_string()))?;
        let conn = schema::open_database(&config.database_path, &config.rate_limits)?;
        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// An in-memory engine instance, for tests.
    pub fn open_in_memory(config: HarvesterConfig, clock: Arc<dyn Clock>) -> Result<Self, HarvestError> {
        std::fs::create_dir_all(&config.cache_root)?;
        let conn = schema::open_in_memory(&config.rate_limits)?;
        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    #[must_use]
    pub fn cache(&self) -> Cache {
        Cache::new(
            self.conn.clone(),
            self.config.cache_root.clone(),
            self.config.cache,
            self.config.allow_list.clone(),
            self.clock.clone(),
        )
    }

    #[must_use]
    pub fn limiter(&self) -> RateLimiter {
        RateLimiter::new(self.conn.clone(), self.clock.clone())
    }

    /// Compose the cache, limiter, and `driver` into a ready-to-use
    /// [`FetchCoordinator`].
    #[must_use]
    pub fn coordinator(&self, driver: Arc<dyn Driver>) -> FetchCoordinator {
        FetchCoordinator::new(self.cache(), self.limiter(), driver)
    }
}
