//! Adapter for a JobSpy-compatible search service reachable over HTTP.

use async_trait::async_trait;
use jobsweep_core::{RawResult, SearchTask};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::http::HttpFetcher;
use crate::{AdapterError, AdapterVariant, SourceAdapter};

const SEARCH_PATH: &str = "/api/v1/search_jobs";

pub struct ApiSourceAdapter {
    http: HttpFetcher,
    base_url: String,
    sites: Vec<String>,
}

impl ApiSourceAdapter {
    /// `sites` lists the sources the service can query; empty means any.
    pub fn new(http: HttpFetcher, base_url: impl Into<String>, sites: Vec<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sites,
        }
    }

    fn search_url(&self) -> String {
        format!("{}{}", self.base_url, SEARCH_PATH)
    }
}

pub fn search_query(task: &SearchTask) -> Vec<(String, String)> {
    let mut query = vec![
        ("site_name".to_string(), task.source.clone()),
        ("search_term".to_string(), task.query.clone()),
        ("location".to_string(), task.location.clone()),
        ("results_wanted".to_string(), task.results_wanted.to_string()),
        ("hours_old".to_string(), task.hours_old.to_string()),
    ];
    query.extend(task.params.iter().map(|(k, v)| (k.clone(), v.clone())));
    query
}

/// Split a search response into rows. Accepts `{"jobs": [...]}` or a bare array;
/// an `{"error": "..."}` body is classified by its message. Rows that are not
/// objects are kept as empty rows so they are counted and rejected downstream.
pub fn rows_from_response(source: &str, body: JsonValue) -> Result<Vec<RawResult>, AdapterError> {
    let rows = match body {
        JsonValue::Array(rows) => rows,
        JsonValue::Object(mut obj) => {
            if let Some(JsonValue::String(message)) = obj.get("error") {
                return Err(AdapterError::from_provider_message(message));
            }
            match obj.remove("jobs") {
                Some(JsonValue::Array(rows)) => rows,
                Some(JsonValue::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(AdapterError::Unknown(format!(
                        "unexpected `jobs` payload: {other}"
                    )))
                }
            }
        }
        other => {
            return Err(AdapterError::Unknown(format!(
                "unexpected search response: {other}"
            )))
        }
    };

    let mut malformed = 0usize;
    let results = rows
        .into_iter()
        .map(|row| match row {
            JsonValue::Object(map) => RawResult::api_row(source, map),
            _ => {
                malformed += 1;
                RawResult::api_row(source, Default::default())
            }
        })
        .collect::<Vec<_>>();
    if malformed > 0 {
        warn!(source, malformed, "search response carried non-object rows");
    }

    if results.is_empty() {
        return Err(AdapterError::Empty);
    }
    Ok(results)
}

#[async_trait]
impl SourceAdapter for ApiSourceAdapter {
    fn variant(&self) -> AdapterVariant {
        AdapterVariant::Api
    }

    fn supports(&self, source: &str) -> bool {
        self.sites.is_empty() || self.sites.iter().any(|s| s == source)
    }

    async fn attempt(&self, task: &SearchTask) -> Result<Vec<RawResult>, AdapterError> {
        let body = self
            .http
            .get_json(&task.source, &self.search_url(), &search_query(task))
            .await?;
        let rows = rows_from_response(&task.source, body)?;
        debug!(source = %task.source, rows = rows.len(), "search rows decoded");
        Ok(rows)
    }
}
