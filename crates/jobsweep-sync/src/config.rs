//! Collection run configuration. Every policy value is read from the config
//! file; nothing here falls back to a built-in default.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest single pause accepted from a config file: one day.
pub const MAX_DELAY_SECS: f64 = 86_400.0;

fn delay_secs_ok(secs: f64) -> bool {
    secs.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&secs)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub terms: Vec<String>,
    pub locations: Vec<String>,
    /// Locations beyond this many are dropped to bound provider load.
    pub max_locations: usize,
    pub sources: Vec<SourceConfig>,
    pub results_wanted: u32,
    /// Recency window in hours.
    pub hours_old: u32,
    /// Per-call adapter timeout for interactive calls.
    pub call_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub pacing: PacingPolicy,
    pub normalizer: NormalizerPolicy,
    /// Location strings to try, least specific last, when a source rejects
    /// a location. Locations without an entry get fallbacks derived from
    /// their comma segments.
    #[serde(default)]
    pub location_fallbacks: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub results_wanted: Option<u32>,
    #[serde(default)]
    pub hours_old: Option<u32>,
    /// Longer timeout for sources that serve bulk calls.
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    /// Extra pause before every call to this source.
    #[serde(default)]
    pub pre_task_delay_secs: Option<f64>,
    /// Search phrase sent instead of the bare term, e.g. `{term} jobs near {location}`.
    #[serde(default)]
    pub search_term_template: Option<String>,
    /// Search page URL template used by the browser adapter.
    #[serde(default)]
    pub browser_url: Option<String>,
    /// Provider-specific parameters passed through to the adapter untouched.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub backoff_increment_secs: u64,
}

impl RetryPolicy {
    /// Wait before retry number `retry_index` (1-based).
    pub fn delay_for_retry(&self, retry_index: u32) -> Duration {
        Duration::from_secs(
            self.backoff_base_secs
                .saturating_add(u64::from(retry_index).saturating_mul(self.backoff_increment_secs)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    pub fn fixed(secs: f64) -> Self {
        Self {
            min_secs: secs,
            max_secs: secs,
        }
    }

    fn is_valid(&self) -> bool {
        delay_secs_ok(self.min_secs)
            && delay_secs_ok(self.max_secs)
            && self.min_secs <= self.max_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacingPolicy {
    pub between_tasks: DelayRange,
    pub between_terms: DelayRange,
    pub between_locations: DelayRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerPolicy {
    pub description_max_chars: usize,
    /// Longest trailing location segment still read as a region abbreviation.
    pub region_token_max_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no search terms configured")]
    NoTerms,
    #[error("no locations configured")]
    NoLocations,
    #[error("no enabled sources configured")]
    NoSources,
    #[error("max_locations must be at least 1")]
    ZeroMaxLocations,
    #[error("source `{0}` is configured more than once")]
    DuplicateSource(String),
    #[error("invalid pacing `{0}`: need 0 <= min <= max, at most one day")]
    InvalidPacing(&'static str),
    #[error("search term template for `{0}` has no {{term}} placeholder")]
    InvalidTemplate(String),
}

impl CollectionConfig {
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("parsing collection config")
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.terms.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::NoTerms);
        }
        if self.locations.iter().all(|l| l.trim().is_empty()) {
            return Err(ConfigError::NoLocations);
        }
        if self.max_locations == 0 {
            return Err(ConfigError::ZeroMaxLocations);
        }
        if !self.sources.iter().any(|s| s.enabled) {
            return Err(ConfigError::NoSources);
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            if let Some(template) = &source.search_term_template {
                if !template.contains("{term}") {
                    return Err(ConfigError::InvalidTemplate(source.name.clone()));
                }
            }
            if source.pre_task_delay_secs.is_some_and(|secs| !delay_secs_ok(secs)) {
                return Err(ConfigError::InvalidPacing("pre_task_delay_secs"));
            }
        }

        for (label, range) in [
            ("between_tasks", self.pacing.between_tasks),
            ("between_terms", self.pacing.between_terms),
            ("between_locations", self.pacing.between_locations),
        ] {
            if !range.is_valid() {
                return Err(ConfigError::InvalidPacing(label));
            }
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn call_timeout_for(&self, source: &str) -> Duration {
        let secs = self
            .source(source)
            .and_then(|s| s.call_timeout_secs)
            .unwrap_or(self.call_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn pre_task_delay_for(&self, source: &str) -> Option<Duration> {
        self.source(source)
            .and_then(|s| s.pre_task_delay_secs)
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Fallback location strings for `location`, least specific last.
    pub fn fallbacks_for(&self, location: &str) -> Vec<String> {
        match self.location_fallbacks.get(location) {
            Some(list) => list.clone(),
            None => derive_location_fallbacks(location),
        }
    }
}

/// "São Paulo, SP, Brasil" -> ["São Paulo, Brasil", "São Paulo"].
pub fn derive_location_fallbacks(location: &str) -> Vec<String> {
    let parts = location
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>();
    let mut out = Vec::new();
    if parts.len() >= 3 {
        out.push(format!("{}, {}", parts[0], parts[parts.len() - 1]));
    }
    if parts.len() >= 2 {
        out.push(parts[0].to_string());
    }
    out
}
