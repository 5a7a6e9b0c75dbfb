//! Resolved configuration records.
//!
//! Per §9's Design Notes, runtime-flexible keyword arguments are replaced by
//! a small options record per entry point: every field here is named,
//! defaulted, and documented rather than threaded through as loose
//! parameters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// One of the three page categories the cache keys TTLs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    List,
    Detail,
    Image,
}

impl PageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PageType::List => "list",
            PageType::Detail => "detail",
            PageType::Image => "image",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "list" => Some(PageType::List),
            "detail" => Some(PageType::Detail),
            "image" => Some(PageType::Image),
            _ => None,
        }
    }
}

/// Per-site rate-limit budget, as named by spec.md §3/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub period_seconds: u32,
    /// Carried per §6; not enforced inside `admit` (see SPEC_FULL.md),
    /// available to callers that want their own concurrency semaphore.
    pub concurrent_limit: u32,
    /// Carried per §6; a backoff hint for callers, not consumed internally.
    pub retry_after_seconds: u32,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(max_requests: u32, period_seconds: u32) -> Self {
        Self {
            max_requests,
            period_seconds,
            concurrent_limit: 1,
            retry_after_seconds: 60,
        }
    }

    #[must_use]
    pub fn with_concurrent_limit(mut self, concurrent_limit: u32) -> Self {
        self.concurrent_limit = concurrent_limit;
        self
    }

    #[must_use]
    pub fn with_retry_after_seconds(mut self, retry_after_seconds: u32) -> Self {
        self.retry_after_seconds = retry_after_seconds;
        self
    }
}

/// The seeded per-site rate-limit defaults, mirroring the real site roster
/// this engine was built against (SPEC_FULL.md §1/§6 supplement).
#[must_use]
pub fn default_rate_limits() -> Vec<(&'static str, RateLimitConfig)> {
    vec![
        ("athome", RateLimitConfig::new(60, 300)),
        ("suumo", RateLimitConfig::new(30, 300)),
        ("ieichiba", RateLimitConfig::new(20, 300)),
        ("zero_estate", RateLimitConfig::new(10, 300)),
        ("jmty", RateLimitConfig::new(20, 300)),
        ("homes", RateLimitConfig::new(30, 300)),
        ("rakuten", RateLimitConfig::new(30, 300)),
    ]
}

/// Per-site query-parameter allow-list used by the canonicalizer.
#[derive(Debug, Clone)]
pub struct AllowListConfig {
    per_site: HashMap<String, Vec<String>>,
    default: Vec<String>,
}

impl AllowListConfig {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            per_site: HashMap::new(),
            default: vec!["id".to_string(), "page".to_string()],
        }
    }

    /// The seeded per-site allow-lists from SPEC_FULL.md §1/§6 supplement.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut cfg = Self::empty();
        cfg.set("athome", vec!["bukkenNo", "id"]);
        cfg.set("suumo", vec!["bc", "id"]);
        cfg.set("ieichiba", vec!["id"]);
        cfg.set("zero_estate", vec!["id"]);
        cfg.set("jmty", vec!["id"]);
        cfg.set("homes", vec!["id"]);
        cfg.set("rakuten", vec!["id"]);
        cfg
    }

    pub fn set(&mut self, site_name: impl Into<String>, keys: Vec<impl Into<String>>) {
        self.per_site
            .insert(site_name.into(), keys.into_iter().map(Into::into).collect());
    }

    #[must_use]
    pub fn keys_for(&self, site_name: &str) -> Vec<String> {
        self.per_site
            .get(site_name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Default for AllowListConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Compiled-in TTL defaults by page type (spec §4.3), overridable.
#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    pub list: Duration,
    pub detail: Duration,
    pub image: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(6 * 3600),
            detail: Duration::from_secs(7 * 86400),
            image: Duration::from_secs(30 * 86400),
        }
    }
}

impl TtlConfig {
    #[must_use]
    pub fn for_page_type(&self, page_type: PageType) -> Duration {
        match page_type {
            PageType::List => self.list,
            PageType::Detail => self.detail,
            PageType::Image => self.image,
        }
    }
}

/// Cache-maintenance bounds (spec §4.3's cleanup phases).
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ttl: TtlConfig,
    /// Step 4: files older than this are deleted and their entry invalidated.
    pub cleanup_age_days: u32,
    /// Step 5: LRU eviction target, as a fraction of `max_cache_size_mb`.
    pub max_cache_size_mb: u64,
    pub lru_target_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: TtlConfig::default(),
            cleanup_age_days: 30,
            max_cache_size_mb: 1000,
            lru_target_fraction: 0.8,
        }
    }
}

/// The engine's top-level, fully-resolved configuration. Every field is
/// present and defaulted; there is no file to load here (that lives in the
/// `harvest-cli` binary, which resolves its own partial TOML config down to
/// this type before calling `Harvester::open`).
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub database_path: PathBuf,
    pub cache_root: PathBuf,
    pub cache: CacheConfig,
    pub allow_list: AllowListConfig,
    pub rate_limits: Vec<(String, RateLimitConfig)>,
}

impl HarvesterConfig {
    #[must_use]
    pub fn new(database_path: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            cache_root: cache_root.into(),
            cache: CacheConfig::default(),
            allow_list: AllowListConfig::with_defaults(),
            rate_limits: default_rate_limits()
                .into_iter()
                .map(|(site, cfg)| (site.to_string(), cfg))
                .collect(),
        }
    }
}
