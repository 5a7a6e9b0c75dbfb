//! TOML-partial CLI configuration, resolved once at startup into the
//! library's [`harvest::config::HarvesterConfig`] (spec's "resolve once at
//! the boundary" shape, mirroring `webfetch/src/resolved.rs`).

use std::collections::HashMap;
use std::path::PathBuf;

use harvest::config::{HarvesterConfig, RateLimitConfig};
use serde::Deserialize;

/// What a deployment actually hand-writes: a database path, a cache root,
/// and per-site overrides. Everything else falls back to the library's
/// compiled-in defaults once resolved.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CliConfig {
    pub database_path: Option<PathBuf>,
    pub cache_root: Option<PathBuf>,
    #[serde(default)]
    pub sites: HashMap<String, SiteOverride>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteOverride {
    pub max_requests: Option<u32>,
    pub period_seconds: Option<u32>,
    pub concurrent_limit: Option<u32>,
    pub retry_after_seconds: Option<u32>,
    #[serde(default)]
    pub allow_query_keys: Vec<String>,
}

impl CliConfig {
    /// Load and parse a TOML file. A missing file is not an error — the
    /// caller falls back to [`CliConfig::default`], matching the library's
    /// own "fatal at startup only for an unreachable database or
    /// unwritable cache root" policy (spec §7): a missing CLI config file
    /// is neither.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let config: CliConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Resolve into the library's fully-defaulted config type.
    #[must_use]
    pub fn resolve(self) -> HarvesterConfig {
        let database_path = self
            .database_path
            .unwrap_or_else(|| PathBuf::from("harvest.sqlite3"));
        let cache_root = self.cache_root.unwrap_or_else(|| PathBuf::from("cache"));

        let mut resolved = HarvesterConfig::new(database_path, cache_root);

        for (site, overrides) in &self.sites {
            if !overrides.allow_query_keys.is_empty() {
                resolved
                    .allow_list
                    .set(site.clone(), overrides.allow_query_keys.clone());
            }

            let existing = resolved
                .rate_limits
                .iter()
                .position(|(name, _)| name == site);
            let mut rate_limit = existing
                .map(|idx| resolved.rate_limits[idx].1)
                .unwrap_or_else(|| RateLimitConfig::new(30, 300));
            if let Some(v) = overrides.max_requests {
                rate_limit.max_requests = v;
            }
            if let Some(v) = overrides.period_seconds {
                rate_limit.period_seconds = v;
            }
            if let Some(v) = overrides.concurrent_limit {
                rate_limit.concurrent_limit = v;
            }
            if let Some(v) = overrides.retry_after_seconds {
                rate_limit.retry_after_seconds = v;
            }

            match existing {
                Some(idx) => resolved.rate_limits[idx].1 = rate_limit,
                None => resolved.rate_limits.push((site.clone(), rate_limit)),
            }
        }

        resolved
    }
}
