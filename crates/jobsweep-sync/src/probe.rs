//! Single-query smoke test against one source.

use std::collections::BTreeSet;

use jobsweep_adapters::{render_template, AdapterErrorKind, SourceAdapter};
use jobsweep_core::{RawResult, RawShape, SearchTask};
use serde::Serialize;
use tracing::info;

use crate::config::CollectionConfig;

const PROBE_RESULTS: u32 = 5;
/// One week.
const PROBE_HOURS: u32 = 168;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub source: String,
    pub term: String,
    pub location: String,
    pub results: usize,
    /// Field names present on at least one result.
    pub fields: BTreeSet<String>,
    pub error: Option<AdapterErrorKind>,
    pub message: Option<String>,
}

impl ProbeReport {
    pub fn ok(&self) -> bool {
        self.error.is_none() && self.results > 0
    }
}

/// One attempt, no retries, bounded by the source's call timeout. Source
/// params and search term template from `config` are applied when the source
/// is configured.
pub async fn probe_source(
    adapter: &dyn SourceAdapter,
    config: &CollectionConfig,
    source: &str,
    term: &str,
    location: &str,
) -> ProbeReport {
    let configured = config.source(source);
    let mut task = SearchTask {
        index: 0,
        term: term.to_string(),
        query: term.to_string(),
        location: location.to_string(),
        source: source.to_string(),
        results_wanted: PROBE_RESULTS,
        hours_old: PROBE_HOURS,
        params: configured.map(|s| s.params.clone()).unwrap_or_default(),
    };
    if let Some(template) = configured.and_then(|s| s.search_term_template.as_ref()) {
        task.query = render_template(template, &task, term, false);
    }

    let mut report = ProbeReport {
        source: source.to_string(),
        term: term.to_string(),
        location: location.to_string(),
        results: 0,
        fields: BTreeSet::new(),
        error: None,
        message: None,
    };

    let timeout = config.call_timeout_for(source);
    match tokio::time::timeout(timeout, adapter.attempt(&task)).await {
        Ok(Ok(results)) => {
            report.results = results.len();
            report.fields = results.iter().flat_map(field_names).collect();
        }
        Ok(Err(err)) => {
            report.error = Some(err.kind());
            report.message = Some(err.to_string());
        }
        Err(_) => {
            report.error = Some(AdapterErrorKind::Timeout);
            report.message = Some(format!("no response within {timeout:?}"));
        }
    }
    info!(source, results = report.results, error = ?report.error, "probe finished");
    report
}

fn field_names(raw: &RawResult) -> Vec<String> {
    match &raw.shape {
        RawShape::ApiRow(row) => row
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.clone())
            .collect(),
        RawShape::BrowserCard(card) => [
            ("job_id", &card.job_id),
            ("title", &card.title),
            ("company", &card.company),
            ("location", &card.location),
            ("posted", &card.posted),
            ("link", &card.link),
            ("description", &card.description),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_some())
        .map(|(k, _)| k.to_string())
        .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config;
    use async_trait::async_trait;
    use jobsweep_adapters::{AdapterError, AdapterVariant, FixtureScript, FixtureSourceAdapter};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct QueryLog(Mutex<Vec<String>>);

    #[async_trait]
    impl SourceAdapter for QueryLog {
        fn variant(&self) -> AdapterVariant {
            AdapterVariant::Fixture
        }

        async fn attempt(&self, task: &SearchTask) -> Result<Vec<RawResult>, AdapterError> {
            self.0.lock().unwrap().push(task.query.clone());
            Err(AdapterError::Empty)
        }
    }

    #[tokio::test]
    async fn probe_reports_count_and_fields() {
        let rows = (0..8)
            .map(|i| {
                json!({"title": format!("Vaga {i}"), "company": "Acme", "salary": null})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();
        let mut scripts = HashMap::new();
        scripts.insert(
            "indeed".to_string(),
            FixtureScript {
                outcomes: Vec::new(),
                rows,
            },
        );
        let adapter = FixtureSourceAdapter::new(scripts);
        let cfg = config(&["Dados"], &["São Paulo"], &["indeed"]);

        let report = probe_source(&adapter, &cfg, "indeed", "Dados", "São Paulo").await;
        assert!(report.ok());
        assert_eq!(report.results, 5);
        assert_eq!(
            report.fields.into_iter().collect::<Vec<_>>(),
            vec!["company".to_string(), "title".to_string()]
        );

        let missing = probe_source(&adapter, &cfg, "glassdoor", "Dados", "São Paulo").await;
        assert!(!missing.ok());
        assert_eq!(missing.error, Some(AdapterErrorKind::Unknown));
    }

    #[tokio::test]
    async fn single_query_uses_the_source_template() {
        let mut cfg = config(&["Dados"], &["Recife, PE"], &["google", "indeed"]);
        cfg.sources[0].search_term_template = Some("{term} jobs near {location}".into());
        let adapter = QueryLog::default();

        probe_source(&adapter, &cfg, "google", "BI", "Recife, PE").await;
        probe_source(&adapter, &cfg, "indeed", "BI", "Recife, PE").await;

        assert_eq!(
            *adapter.0.lock().unwrap(),
            vec!["BI jobs near Recife, PE".to_string(), "BI".to_string()]
        );
    }
}
