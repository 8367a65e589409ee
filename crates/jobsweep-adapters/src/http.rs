//! Shared HTTP client for network-backed adapters.
//!
//! Retries are not performed here: every failure is classified into an
//! [`AdapterError`] tag and handed back to the caller's retry controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};

use crate::AdapterError;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub per_source_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            per_source_concurrency: 1,
        }
    }
}

pub fn classify_status(status: StatusCode, body: &str) -> AdapterError {
    let detail = format!("http status {}: {}", status.as_u16(), truncate(body, 200));
    match status {
        StatusCode::TOO_MANY_REQUESTS => AdapterError::RateLimited(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AdapterError::BadRequest(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => AdapterError::Timeout(detail),
        // Scraping services relay provider failures as 5xx with the provider's message.
        s if s.is_server_error() => match AdapterError::from_provider_message(body) {
            AdapterError::Unknown(_) => AdapterError::Unknown(detail),
            tagged => tagged,
        },
        _ => AdapterError::Unknown(detail),
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status, "")
    } else {
        AdapterError::Unknown(err.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
        })
    }

    async fn per_source_semaphore(&self, source: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    /// GET `url` with `query` pairs and decode the body as JSON.
    pub async fn get_json(
        &self,
        source: &str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<JsonValue, AdapterError> {
        let per_source = self.per_source_semaphore(source).await;
        let _permit = per_source
            .acquire()
            .await
            .map_err(|e| AdapterError::Unknown(format!("source limiter closed: {e}")))?;

        let span = info_span!("http_fetch", source, url);
        async {
            let resp = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| classify_reqwest_error(&e))?;

            let status = resp.status();
            let body = resp.text().await.map_err(|e| classify_reqwest_error(&e))?;
            debug!(status = status.as_u16(), bytes = body.len(), "response received");

            if !status.is_success() {
                return Err(classify_status(status, &body));
            }

            let value = serde_json::from_str::<JsonValue>(&body)
                .map_err(|e| AdapterError::Unknown(format!("invalid JSON from {url}: {e}")))?;
            Ok::<_, AdapterError>(value)
        }
        .instrument(span)
        .await
    }
}
