use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobsweep_adapters::{AdapterError, AdapterVariant, SourceAdapter};
use jobsweep_core::{CanonicalRecord, Fingerprint, RawResult, SearchTask};
use jobsweep_storage::{InsertOutcome, MemoryJobStore, PersistenceGateway, StorageError};
use jobsweep_sync::{
    CollectionConfig, CollectionOrchestrator, ConfigError, DelayRange, DisableReason,
    NormalizerPolicy, PacingPolicy, RecordingSleeper, RetryPolicy, SourceConfig, SourceStatus,
    StopSignal,
};
use serde_json::json;

type Outcome = Result<Vec<RawResult>, AdapterError>;

/// Adapter that plays per-source scripted outcomes, then falls back to a
/// per-source responder.
struct ScriptedAdapter {
    variant: AdapterVariant,
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    responders: HashMap<String, fn(&SearchTask) -> Outcome>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedAdapter {
    fn new(variant: AdapterVariant) -> Self {
        Self {
            variant,
            scripts: Mutex::new(HashMap::new()),
            responders: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(self, source: &str, outcomes: Vec<Outcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(source.to_string(), outcomes.into());
        self
    }

    fn respond(mut self, source: &str, responder: fn(&SearchTask) -> Outcome) -> Self {
        self.responders.insert(source.to_string(), responder);
        self
    }

    /// (source, location) per call, in order.
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, source: &str) -> usize {
        self.calls().iter().filter(|(s, _)| s == source).count()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn variant(&self) -> AdapterVariant {
        self.variant
    }

    async fn attempt(&self, task: &SearchTask) -> Outcome {
        self.calls
            .lock()
            .unwrap()
            .push((task.source.clone(), task.location.clone()));
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&task.source)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(outcome) => outcome,
            None => match self.responders.get(&task.source) {
                Some(responder) => responder(task),
                None => Err(AdapterError::Empty),
            },
        }
    }
}

/// Memory store whose inserts fail for URLs containing "broken".
struct FlakyStore {
    inner: MemoryJobStore,
}

#[async_trait]
impl PersistenceGateway for FlakyStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError> {
        self.inner.exists(fingerprint).await
    }

    async fn insert(
        &self,
        record: &CanonicalRecord,
        fingerprint: &Fingerprint,
    ) -> Result<InsertOutcome, StorageError> {
        if record.url.contains("broken") {
            return Err(StorageError::Message("disk full".into()));
        }
        self.inner.insert(record, fingerprint).await
    }
}

fn source(name: &str) -> SourceConfig {
    SourceConfig {
        name: name.into(),
        enabled: true,
        results_wanted: None,
        hours_old: None,
        call_timeout_secs: None,
        pre_task_delay_secs: None,
        search_term_template: None,
        browser_url: None,
        params: BTreeMap::new(),
    }
}

fn config(terms: &[&str], locations: &[&str], sources: &[&str]) -> CollectionConfig {
    CollectionConfig {
        terms: terms.iter().map(|s| s.to_string()).collect(),
        locations: locations.iter().map(|s| s.to_string()).collect(),
        max_locations: 3,
        sources: sources.iter().map(|s| source(s)).collect(),
        results_wanted: 10,
        hours_old: 24,
        call_timeout_secs: 10,
        retry: RetryPolicy {
            max_retries: 2,
            backoff_base_secs: 5,
            backoff_increment_secs: 3,
        },
        pacing: PacingPolicy {
            between_tasks: DelayRange::fixed(0.0),
            between_terms: DelayRange::fixed(0.0),
            between_locations: DelayRange::fixed(0.0),
        },
        normalizer: NormalizerPolicy {
            description_max_chars: 1500,
            region_token_max_chars: 3,
        },
        location_fallbacks: BTreeMap::new(),
    }
}

fn row(source: &str, title: &str, company: &str, url: Option<&str>) -> RawResult {
    let mut value = json!({
        "title": title,
        "company": company,
        "location": "City X, XX",
    });
    if let Some(url) = url {
        value["job_url"] = json!(url);
    }
    RawResult::api_row(source, value.as_object().cloned().unwrap())
}

fn per_task_row(task: &SearchTask) -> Outcome {
    let url = format!("https://jobs.example/{}/{}", task.source, task.term);
    Ok(vec![row(&task.source, &task.term, "Acme", Some(&url))])
}

fn orchestrator(
    cfg: CollectionConfig,
    adapter: Arc<ScriptedAdapter>,
    store: Arc<dyn PersistenceGateway>,
    sleeper: Arc<RecordingSleeper>,
) -> CollectionOrchestrator {
    CollectionOrchestrator::new(cfg, adapter, store).with_sleeper(sleeper)
}

#[tokio::test]
async fn valid_rows_persist_and_rows_without_url_are_rejected() {
    let adapter = Arc::new(ScriptedAdapter::new(AdapterVariant::Api).script(
        "A",
        vec![Ok(vec![
            row("A", "Data Analyst", "Acme", Some("https://jobs.example/1")),
            row("A", "Data Engineer", "Globex", Some("https://jobs.example/2")),
            row("A", "BI Intern", "Initech", None),
        ])],
    ));
    let store = Arc::new(MemoryJobStore::new());
    let sleeper = Arc::new(RecordingSleeper::new());

    let stats = orchestrator(
        config(&["Data"], &["City X"], &["A"]),
        adapter,
        store.clone(),
        sleeper,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.raw_seen, 3);
    assert_eq!(stats.normalized, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.persisted, 2);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(store.len().await, 2);
    assert_eq!(stats.per_location["City X"].persisted, 2);
    assert_eq!(stats.per_source["A"].tasks_succeeded, 1);
}

#[tokio::test]
async fn same_listing_from_two_sources_is_stored_once() {
    let listing = |source: &str| {
        Ok(vec![row(source, "Data Analyst", "Acme", Some("https://jobs.example/shared"))])
    };
    let adapter = Arc::new(
        ScriptedAdapter::new(AdapterVariant::Api)
            .script("A", vec![listing("A")])
            .script("B", vec![listing("B")]),
    );
    let store = Arc::new(MemoryJobStore::new());

    let stats = orchestrator(
        config(&["Data"], &["City X"], &["A", "B"]),
        adapter,
        store.clone(),
        Arc::new(RecordingSleeper::new()),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.normalized, 2);
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.per_source["B"].duplicates, 1);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn listings_stored_by_an_earlier_run_count_as_duplicates() {
    let store = Arc::new(MemoryJobStore::new());
    for _ in 0..2 {
        let adapter = Arc::new(ScriptedAdapter::new(AdapterVariant::Api).respond("A", per_task_row));
        let stats = orchestrator(
            config(&["Data"], &["City X"], &["A"]),
            adapter,
            store.clone(),
            Arc::new(RecordingSleeper::new()),
        )
        .run()
        .await
        .unwrap();
        assert_eq!(stats.normalized, 1);
    }
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn every_source_rate_limited_still_returns_statistics() {
    let limited = || Err(AdapterError::RateLimited("429".into()));
    let adapter = Arc::new(
        ScriptedAdapter::new(AdapterVariant::Api)
            .script("A", vec![limited()])
            .script("B", vec![limited()]),
    );

    let stats = orchestrator(
        config(&["Data", "BI"], &["City X"], &["A", "B"]),
        adapter.clone(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(RecordingSleeper::new()),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.persisted, 0);
    assert_eq!(stats.adapter_switch, None);
    for name in ["A", "B"] {
        assert_eq!(
            stats.final_states[name].status,
            SourceStatus::Disabled(DisableReason::RateLimited)
        );
    }
    assert_eq!(stats.disabled_sources(), vec!["A", "B"]);
    assert_eq!(adapter.calls().len(), 2);
}

#[tokio::test]
async fn rate_limit_on_first_task_skips_the_rest_for_that_source() {
    let adapter = Arc::new(
        ScriptedAdapter::new(AdapterVariant::Api)
            .script("A", vec![Err(AdapterError::RateLimited("slow down".into()))])
            .respond("A", per_task_row)
            .respond("B", per_task_row),
    );
    let terms = ["Dados", "BI", "Engenharia de Dados", "Ciência de Dados"];

    let stats = orchestrator(
        config(&terms, &["City X"], &["A", "B"]),
        adapter.clone(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(RecordingSleeper::new()),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(adapter.calls_to("A"), 1);
    let a = &stats.per_source["A"];
    assert_eq!(a.tasks_planned, 4);
    assert_eq!(a.tasks_skipped, 3);
    assert_eq!(a.attempts, 1);
    assert_eq!(stats.per_source["B"].persisted, 4);

    let transition = &stats.transitions[0];
    assert_eq!(transition.source, "A");
    assert_eq!(transition.to, SourceStatus::Disabled(DisableReason::RateLimited));
}

#[tokio::test]
async fn timeouts_abandon_only_the_task() {
    let adapter = Arc::new(
        ScriptedAdapter::new(AdapterVariant::Api)
            .respond("A", |_| Err(AdapterError::Timeout("read timed out".into()))),
    );
    let sleeper = Arc::new(RecordingSleeper::new());

    let stats = orchestrator(
        config(&["Data", "BI"], &["City X"], &["A"]),
        adapter.clone(),
        Arc::new(MemoryJobStore::new()),
        sleeper.clone(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(adapter.calls_to("A"), 6);
    assert_eq!(
        sleeper.recorded(),
        [8, 11, 8, 11].map(Duration::from_secs).to_vec()
    );
    assert_eq!(stats.per_source["A"].tasks_abandoned, 2);
    assert_eq!(stats.final_states["A"].status, SourceStatus::Active);
    assert_eq!(stats.backoff_secs, 38.0);
}

#[tokio::test]
async fn rejected_location_falls_back_and_is_remembered() {
    let adapter = Arc::new(
        ScriptedAdapter::new(AdapterVariant::Api)
            .script(
                "glassdoor",
                vec![Err(AdapterError::BadRequest("location not parsed".into()))],
            )
            .respond("glassdoor", per_task_row),
    );

    let stats = orchestrator(
        config(&["Dados", "BI"], &["São Paulo, SP, Brasil"], &["glassdoor"]),
        adapter.clone(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(RecordingSleeper::new()),
    )
    .run()
    .await
    .unwrap();

    let locations = adapter
        .calls()
        .into_iter()
        .map(|(_, location)| location)
        .collect::<Vec<_>>();
    assert_eq!(
        locations,
        vec!["São Paulo, SP, Brasil", "São Paulo, Brasil", "São Paulo, Brasil"]
    );
    assert_eq!(stats.persisted, 2);
    assert_eq!(
        stats.final_states["glassdoor"].location_overrides["São Paulo, SP, Brasil"],
        "São Paulo, Brasil"
    );
    // Records keep the configured search location.
    assert_eq!(stats.per_location["São Paulo, SP, Brasil"].persisted, 2);
}

#[tokio::test]
async fn run_switches_to_fallback_adapter_once_primary_is_exhausted() {
    let primary = Arc::new(
        ScriptedAdapter::new(AdapterVariant::Api)
            .respond("A", |_| Err(AdapterError::RateLimited("429".into())))
            .respond("B", |_| Err(AdapterError::RateLimited("429".into()))),
    );
    let fallback = Arc::new(
        ScriptedAdapter::new(AdapterVariant::Browser)
            .respond("A", per_task_row)
            .respond("B", per_task_row),
    );

    let stats = CollectionOrchestrator::new(
        config(&["Data", "BI"], &["City X"], &["A", "B"]),
        primary.clone(),
        Arc::new(MemoryJobStore::new()),
    )
    .with_fallback(fallback.clone())
    .with_sleeper(Arc::new(RecordingSleeper::new()))
    .run()
    .await
    .unwrap();

    let switch = stats.adapter_switch.clone().unwrap();
    assert_eq!(switch.from, AdapterVariant::Api);
    assert_eq!(switch.to, AdapterVariant::Browser);
    assert_eq!(switch.after_task, 1);
    assert_eq!(primary.calls().len(), 2);
    assert_eq!(fallback.calls().len(), 2);
    assert_eq!(stats.persisted, 2);
    assert_eq!(stats.final_states["A"].status, SourceStatus::Active);
    assert_eq!(stats.transitions.len(), 2);
}

#[tokio::test]
async fn storage_failures_are_counted_not_fatal() {
    let adapter = Arc::new(ScriptedAdapter::new(AdapterVariant::Api).script(
        "A",
        vec![Ok(vec![
            row("A", "Data Analyst", "Acme", Some("https://jobs.example/broken")),
            row("A", "Data Engineer", "Acme", Some("https://jobs.example/ok")),
        ])],
    ));
    let store = Arc::new(FlakyStore {
        inner: MemoryJobStore::new(),
    });

    let stats = orchestrator(
        config(&["Data"], &["City X"], &["A"]),
        adapter,
        store.clone(),
        Arc::new(RecordingSleeper::new()),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.storage_failures, 1);
    assert_eq!(stats.persisted, 1);
    assert_eq!(store.inner.len().await, 1);
}

#[tokio::test]
async fn pacing_separates_tasks_and_location_groups() {
    let mut cfg = config(&["Data"], &["City X", "City Y"], &["A", "B"]);
    cfg.pacing = PacingPolicy {
        between_tasks: DelayRange::fixed(3.0),
        between_terms: DelayRange::fixed(5.0),
        between_locations: DelayRange::fixed(8.0),
    };
    cfg.sources[1].pre_task_delay_secs = Some(2.0);
    let adapter = Arc::new(
        ScriptedAdapter::new(AdapterVariant::Api)
            .respond("A", per_task_row)
            .respond("B", per_task_row),
    );
    let sleeper = Arc::new(RecordingSleeper::new());

    let stats = orchestrator(cfg, adapter, Arc::new(MemoryJobStore::new()), sleeper.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(
        sleeper.recorded(),
        [3, 2, 8, 3, 2].map(Duration::from_secs).to_vec()
    );
    assert_eq!(stats.pacing_secs, 18.0);
}

#[tokio::test]
async fn missing_sources_abort_before_any_call() {
    let adapter = Arc::new(ScriptedAdapter::new(AdapterVariant::Api).respond("A", per_task_row));
    let mut cfg = config(&["Data"], &["City X"], &["A"]);
    cfg.sources[0].enabled = false;

    let err = orchestrator(
        cfg,
        adapter.clone(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(RecordingSleeper::new()),
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err, ConfigError::NoSources);
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn stop_signal_ends_the_run_at_a_task_boundary() {
    let adapter = Arc::new(ScriptedAdapter::new(AdapterVariant::Api).respond("A", per_task_row));
    let stop = StopSignal::new();
    stop.stop();

    let stats = orchestrator(
        config(&["Data", "BI"], &["City X"], &["A"]),
        adapter.clone(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(RecordingSleeper::new()),
    )
    .with_stop_signal(stop)
    .run()
    .await
    .unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.planned_tasks, 2);
    assert!(adapter.calls().is_empty());
}
