//! Core collection model: search tasks, raw provider results, canonical job records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

pub const CRATE_NAME: &str = "jobsweep-core";

/// Placeholder stored for best-effort fields a provider did not supply.
pub const UNKNOWN: &str = "unknown";

/// One (term, location, source) unit of work produced by the plan builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTask {
    /// Position of the task in the run's plan.
    pub index: usize,
    /// Search term as configured; recorded on every record the task yields.
    pub term: String,
    /// Search phrase actually sent to the provider (after any per-source template).
    pub query: String,
    pub location: String,
    pub source: String,
    pub results_wanted: u32,
    /// Recency window in hours.
    pub hours_old: u32,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl SearchTask {
    /// Copy of the task aimed at a different location string. Used when a
    /// provider rejects the location shape and the query is retried.
    pub fn at_location(&self, location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..self.clone()
        }
    }
}

/// Source-specific payload returned by an adapter for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub source: String,
    pub shape: RawShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RawShape {
    /// Loosely typed row from a job-board search API. Values may be strings,
    /// numbers, booleans or nulls depending on the provider.
    ApiRow(JsonMap<String, JsonValue>),
    /// Listing card scraped from a rendered search page.
    BrowserCard(BrowserCard),
}

impl RawResult {
    pub fn api_row(source: impl Into<String>, row: JsonMap<String, JsonValue>) -> Self {
        Self {
            source: source.into(),
            shape: RawShape::ApiRow(row),
        }
    }

    pub fn browser_card(source: impl Into<String>, card: BrowserCard) -> Self {
        Self {
            source: source.into(),
            shape: RawShape::BrowserCard(card),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCard {
    pub job_id: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub posted: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
}

/// Validated, normalized job listing. Only the normalizer builds these, and
/// only when title, company and an absolute http(s) URL are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub url: String,
    pub date_posted: String,
    pub job_type: String,
    pub remote: Option<bool>,
    pub salary: String,
    pub source: String,
    pub search_term: String,
    pub search_location: String,
    pub region: Option<String>,
}

impl CanonicalRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.title, &self.company, &self.url)
    }
}

/// 128-bit content digest over `title ++ company ++ url`, rendered as
/// lowercase hex. Used as the dedup key and the persistence primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(title: &str, company: &str, url: &str) -> Self {
        let mut context = md5::Context::new();
        context.consume(title.as_bytes());
        context.consume(company.as_bytes());
        context.consume(url.as_bytes());
        Self(format!("{:x}", context.compute()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
