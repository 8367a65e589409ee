//! Source adapter contract + API, browser and fixture adapter variants.

use std::fmt;

use async_trait::async_trait;
use jobsweep_core::{RawResult, SearchTask};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod api;
pub mod browser;
pub mod fixture;
pub mod http;

pub use api::ApiSourceAdapter;
pub use browser::{parse_listing_cards, BrowserSourceAdapter};
pub use fixture::{FixtureOutcome, FixtureScript, FixtureSourceAdapter};
pub use http::{HttpClientConfig, HttpFetcher};

pub const CRATE_NAME: &str = "jobsweep-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterVariant {
    Api,
    Browser,
    Fixture,
}

impl fmt::Display for AdapterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AdapterVariant::Api => "api",
            AdapterVariant::Browser => "browser",
            AdapterVariant::Fixture => "fixture",
        };
        f.write_str(label)
    }
}

/// Tagged failure of a single adapter call. `Empty` is a successful call with
/// zero results and is never treated as a failure by the retry controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("no results")]
    Empty,
    #[error("{0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    RateLimited,
    BadRequest,
    Timeout,
    Empty,
    Unknown,
}

impl AdapterError {
    pub fn kind(&self) -> AdapterErrorKind {
        match self {
            AdapterError::RateLimited(_) => AdapterErrorKind::RateLimited,
            AdapterError::BadRequest(_) => AdapterErrorKind::BadRequest,
            AdapterError::Timeout(_) => AdapterErrorKind::Timeout,
            AdapterError::Empty => AdapterErrorKind::Empty,
            AdapterError::Unknown(_) => AdapterErrorKind::Unknown,
        }
    }

    /// Classify a provider error message that carries no structured status,
    /// e.g. an exception text relayed by a scraping service.
    pub fn from_provider_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit") {
            AdapterError::RateLimited(message.to_string())
        } else if lower.contains("400")
            || lower.contains("bad request")
            || lower.contains("location not parsed")
        {
            AdapterError::BadRequest(message.to_string())
        } else if lower.contains("timed out") || lower.contains("timeout") {
            AdapterError::Timeout(message.to_string())
        } else {
            AdapterError::Unknown(message.to_string())
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn variant(&self) -> AdapterVariant;

    /// Whether this adapter knows how to query `source` at all.
    fn supports(&self, _source: &str) -> bool {
        true
    }

    async fn attempt(&self, task: &SearchTask) -> Result<Vec<RawResult>, AdapterError>;
}

/// Substitute `{term}`, `{location}` and `{hours}` in a per-source template.
/// With `encode` set, substituted values are form-url-encoded.
pub fn render_template(template: &str, task: &SearchTask, term: &str, encode: bool) -> String {
    let fmt_value = |value: &str| {
        if encode {
            url::form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>()
        } else {
            value.to_string()
        }
    };
    template
        .replace("{term}", &fmt_value(term))
        .replace("{location}", &fmt_value(&task.location))
        .replace("{hours}", &task.hours_old.to_string())
        .replace("{seconds}", &(u64::from(task.hours_old) * 3600).to_string())
}
