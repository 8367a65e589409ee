//! Collection run driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use jobsweep_adapters::SourceAdapter;
use jobsweep_core::{RawResult, SearchTask};
use jobsweep_storage::{InsertOutcome, PersistenceGateway};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{CollectionConfig, ConfigError};
use crate::dedup::Deduplicator;
use crate::normalize::Normalizer;
use crate::pacing::{Pacer, Sleeper, TokioSleeper};
use crate::plan::build_plan;
use crate::retry::{RetryController, RunContext, TaskStatus};
use crate::stats::{AdapterSwitch, RunStatistics};

/// Cooperative cancellation, checked at task boundaries only.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CollectionOrchestrator {
    config: CollectionConfig,
    primary: Arc<dyn SourceAdapter>,
    fallback: Option<Arc<dyn SourceAdapter>>,
    gateway: Arc<dyn PersistenceGateway>,
    sleeper: Arc<dyn Sleeper>,
    stop: StopSignal,
}

impl CollectionOrchestrator {
    pub fn new(
        config: CollectionConfig,
        primary: Arc<dyn SourceAdapter>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            config,
            primary,
            fallback: None,
            gateway,
            sleeper: Arc::new(TokioSleeper),
            stop: StopSignal::new(),
        }
    }

    /// Alternate adapter used once every enabled source is disabled under the primary.
    pub fn with_fallback(mut self, fallback: Arc<dyn SourceAdapter>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<RunStatistics, ConfigError> {
        self.config.validate()?;
        let run_id = Uuid::new_v4();
        let span = info_span!("collection_run", %run_id);
        Ok(self.execute(run_id).instrument(span).await)
    }

    async fn execute(&self, run_id: Uuid) -> RunStatistics {
        let config = &self.config;
        let clock = Instant::now();
        let sources = config
            .enabled_sources()
            .map(|s| s.name.clone())
            .collect::<Vec<_>>();

        let mut ctx = RunContext::new(sources.iter().cloned());
        let plan = build_plan(config, &ctx);
        let mut stats = RunStatistics::new(run_id, Utc::now(), self.primary.variant());
        stats.planned_tasks = plan.len();
        for task in &plan {
            stats.source_mut(&task.source).tasks_planned += 1;
        }
        info!(
            tasks = plan.len(),
            sources = sources.len(),
            adapter = %self.primary.variant(),
            "collection run started"
        );

        let pacer = Pacer::new(config.pacing, self.sleeper.clone());
        let controller = RetryController::new(config.retry, self.sleeper.clone());
        let normalizer = Normalizer::new(config.normalizer);
        let mut dedup = Deduplicator::new();

        let mut adapter = self.primary.clone();
        let mut earlier_transitions = Vec::new();
        let mut last_executed: Option<&SearchTask> = None;
        let mut pacing = Duration::ZERO;
        let mut backoff = Duration::ZERO;

        for (pos, task) in plan.iter().enumerate() {
            if self.stop.is_stopped() {
                warn!(remaining = plan.len() - pos, "stop requested; ending run early");
                stats.cancelled = true;
                break;
            }

            if ctx.is_disabled(&task.source) {
                debug!(source = %task.source, index = task.index, "source disabled; task skipped");
                stats.source_mut(&task.source).tasks_skipped += 1;
            } else if !adapter.supports(&task.source) {
                controller.mark_unsupported(&mut ctx, task);
                stats.source_mut(&task.source).tasks_skipped += 1;
            } else {
                if let Some(previous) = last_executed {
                    pacing += pacer.pause_between(previous, task).await;
                }
                if let Some(delay) = config.pre_task_delay_for(&task.source) {
                    pacing += pacer.pause_fixed(delay).await;
                }
                last_executed = Some(task);

                let span = info_span!(
                    "task",
                    index = task.index,
                    source = %task.source,
                    term = %task.term,
                    location = %task.location
                );
                let outcome = controller
                    .run_task(
                        &mut ctx,
                        adapter.as_ref(),
                        task,
                        &config.fallbacks_for(&task.location),
                        config.call_timeout_for(&task.source),
                    )
                    .instrument(span)
                    .await;
                backoff += outcome.backoff;

                let counts = stats.source_mut(&task.source);
                counts.attempts += outcome.attempts as usize;
                match outcome.status {
                    TaskStatus::Succeeded => {
                        counts.tasks_attempted += 1;
                        counts.tasks_succeeded += 1;
                    }
                    TaskStatus::Abandoned(_) | TaskStatus::SourceDisabled(_) => {
                        counts.tasks_attempted += 1;
                        counts.tasks_abandoned += 1;
                    }
                    TaskStatus::Skipped => counts.tasks_skipped += 1,
                }

                for raw in &outcome.results {
                    self.process(raw, task, &normalizer, &mut dedup, &mut stats).await;
                }
            }

            let tasks_remain = pos + 1 < plan.len();
            if tasks_remain && stats.adapter_switch.is_none() && ctx.all_disabled() {
                if let Some(fallback) = &self.fallback {
                    let switch = AdapterSwitch {
                        from: adapter.variant(),
                        to: fallback.variant(),
                        after_task: task.index,
                        reason: "every enabled source disabled".to_string(),
                    };
                    warn!(from = %switch.from, to = %switch.to, "switching adapter for the rest of the run");
                    let (_, transitions) =
                        std::mem::replace(&mut ctx, RunContext::new(sources.iter().cloned()))
                            .into_parts();
                    earlier_transitions.extend(transitions);
                    adapter = fallback.clone();
                    stats.adapter_switch = Some(switch);
                }
            }
        }

        let (final_states, transitions) = ctx.into_parts();
        earlier_transitions.extend(transitions);
        stats.transitions = earlier_transitions;
        stats.final_states = final_states;
        stats.pacing_secs = pacing.as_secs_f64();
        stats.backoff_secs = backoff.as_secs_f64();
        stats.finished_at = Utc::now();
        stats.elapsed_secs = clock.elapsed().as_secs_f64();

        info!(
            seen = stats.raw_seen,
            normalized = stats.normalized,
            rejected = stats.rejected,
            persisted = stats.persisted,
            duplicates = stats.duplicates,
            storage_failures = stats.storage_failures,
            disabled = ?stats.disabled_sources(),
            "collection run finished"
        );
        stats
    }

    async fn process(
        &self,
        raw: &RawResult,
        task: &SearchTask,
        normalizer: &Normalizer,
        dedup: &mut Deduplicator,
        stats: &mut RunStatistics,
    ) {
        let source = task.source.as_str();
        stats.record_raw(source);

        let record = match normalizer.try_normalize(raw, task) {
            Ok(record) => record,
            Err(reason) => {
                debug!(source, %reason, "raw result rejected");
                stats.record_rejected(source);
                return;
            }
        };
        stats.record_normalized(source, &task.location);

        let (fingerprint, new) = match dedup.is_new(&record, self.gateway.as_ref()).await {
            Ok(checked) => checked,
            Err(err) => {
                warn!(source, error = %err, "existence check failed; record not stored");
                stats.record_storage_failure(source);
                return;
            }
        };
        if !new {
            debug!(source, fingerprint = %fingerprint, "duplicate skipped");
            stats.record_duplicate(source);
            return;
        }

        dedup.reserve(fingerprint.clone());
        match self.gateway.insert(&record, &fingerprint).await {
            Ok(InsertOutcome::Inserted) => stats.record_persisted(source, &task.location),
            Ok(InsertOutcome::AlreadyExists) => stats.record_duplicate(source),
            Err(err) => {
                warn!(source, fingerprint = %fingerprint, error = %err, "insert failed");
                stats.record_storage_failure(source);
            }
        }
    }
}

/// Run one collection with real-time pacing and no adapter fallback.
pub async fn run_collection(
    config: CollectionConfig,
    adapter: Arc<dyn SourceAdapter>,
    gateway: Arc<dyn PersistenceGateway>,
) -> Result<RunStatistics, ConfigError> {
    CollectionOrchestrator::new(config, adapter, gateway).run().await
}

/// The task list a run with `config` would execute, without executing it.
pub fn preview_plan(config: &CollectionConfig) -> Result<Vec<SearchTask>, ConfigError> {
    config.validate()?;
    let ctx = RunContext::new(config.enabled_sources().map(|s| s.name.clone()));
    Ok(build_plan(config, &ctx))
}
