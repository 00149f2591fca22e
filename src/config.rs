//! Run configuration
//!
//! Every section is optional in the TOML file; anything left out falls back
//! to its default.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregator::ListingFilters;
use crate::models::ValidationConfig;
use crate::scrapers::detector::DetectorConfig;
use crate::scrapers::scheduler::SchedulerConfig;
use crate::scrapers::types::SearchParams;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CAR_SCOUT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "car-scout.toml";

/// Fetch path settings shared by the HTTP client and the browser fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout (seconds)
    pub timeout_secs: u64,
    /// Re-fetch blocked pages through headless Chrome
    pub fallback_enabled: bool,
    /// Time given to client-side rendering before reading the DOM (milliseconds)
    pub render_settle_ms: u64,
    /// User agent pool; empty uses the built-in list
    pub user_agents: Vec<String>,
    /// Requests per user agent before rotating
    pub rotate_every: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            fallback_enabled: false,
            render_settle_ms: 1500,
            user_agents: Vec::new(),
            rotate_every: 1,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn render_settle(&self) -> Duration {
        Duration::from_millis(self.render_settle_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub search: SearchParams,
    pub scheduler: SchedulerConfig,
    pub fetch: FetchConfig,
    pub detector: DetectorConfig,
    pub validation: ValidationConfig,
    pub filters: ListingFilters,
    /// Where the binary writes its JSON exports
    pub output_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    /// Path from `CAR_SCOUT_CONFIG`, else `car-scout.toml`
    pub fn path_from_env() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reports every problem at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.search.countries.is_empty() {
            errors.push("search.countries must name at least one market".to_string());
        }
        if self.search.max_listings_per_country == 0 {
            errors.push("search.max_listings_per_country must be > 0".to_string());
        }
        if self.scheduler.max_concurrent == 0 {
            errors.push("scheduler.max_concurrent must be > 0".to_string());
        }
        if self.scheduler.initial_backoff_ms > self.scheduler.max_backoff_ms {
            errors.push("scheduler.initial_backoff_ms exceeds scheduler.max_backoff_ms".to_string());
        }
        if let (Some(min), Some(max)) = (self.search.min_price, self.search.max_price) {
            if min > max {
                errors.push(format!("search.min_price ({}) exceeds search.max_price ({})", min, max));
            }
        }
        if self.validation.min_year > self.validation.max_year() {
            errors.push("validation.min_year exceeds validation.max_year".to_string());
        }

        if !errors.is_empty() {
            bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
        }
        Ok(())
    }

    /// Post-filters actually applied: explicit `[filters]` entries, with
    /// inactive ones inheriting the search constraints
    pub fn effective_filters(&self) -> ListingFilters {
        self.filters.clone().inherit(&self.search)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("output"))
    }
}
