//! Per-source retry/backoff state machine.
//!
//! `RunContext` owns one [`SourceState`] per configured source for the
//! duration of a run. Only [`RetryController`] mutates it; the plan builder and
//! orchestrator read it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jobsweep_adapters::{AdapterError, AdapterErrorKind, SourceAdapter};
use jobsweep_core::{RawResult, SearchTask};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::pacing::Sleeper;
use crate::stats::StateTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    RateLimited,
    /// Every location fallback was rejected.
    BadRequest,
    /// The active adapter cannot query this source.
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    /// Retry number within the current task, 1-based.
    Retrying(u32),
    Disabled(DisableReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub status: SourceStatus,
    pub consecutive_failures: u32,
    /// Configured location -> fallback string that last succeeded for it.
    pub location_overrides: BTreeMap<String, String>,
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            status: SourceStatus::Active,
            consecutive_failures: 0,
            location_overrides: BTreeMap::new(),
        }
    }
}

impl SourceState {
    pub fn is_disabled(&self) -> bool {
        matches!(self.status, SourceStatus::Disabled(_))
    }
}

/// Run-scoped source state plus the transition log.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    states: BTreeMap<String, SourceState>,
    transitions: Vec<StateTransition>,
}

impl RunContext {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            states: sources
                .into_iter()
                .map(|s| (s.into(), SourceState::default()))
                .collect(),
            transitions: Vec::new(),
        }
    }

    pub fn state(&self, source: &str) -> Option<&SourceState> {
        self.states.get(source)
    }

    /// Unknown sources read as disabled so they are never attempted.
    pub fn is_disabled(&self, source: &str) -> bool {
        self.states.get(source).map_or(true, SourceState::is_disabled)
    }

    pub fn all_disabled(&self) -> bool {
        self.states.values().all(SourceState::is_disabled)
    }

    pub fn override_for(&self, source: &str, location: &str) -> Option<&str> {
        self.states
            .get(source)
            .and_then(|s| s.location_overrides.get(location))
            .map(String::as_str)
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn snapshot(&self) -> BTreeMap<String, SourceState> {
        self.states.clone()
    }

    /// Consume the context, yielding final states and the transition log.
    pub fn into_parts(self) -> (BTreeMap<String, SourceState>, Vec<StateTransition>) {
        (self.states, self.transitions)
    }

    fn set_status(
        &mut self,
        task_index: usize,
        source: &str,
        to: SourceStatus,
        cause: Option<AdapterErrorKind>,
    ) {
        let state = self.states.entry(source.to_string()).or_default();
        let from = state.status;
        if from == to {
            return;
        }
        state.status = to;
        debug!(source, ?from, ?to, "source state changed");
        self.transitions.push(StateTransition {
            task_index,
            source: source.to_string(),
            from,
            to,
            cause,
        });
    }

    fn record_success(&mut self, task_index: usize, source: &str) {
        if let Some(state) = self.states.get_mut(source) {
            state.consecutive_failures = 0;
        }
        self.set_status(task_index, source, SourceStatus::Active, None);
    }

    fn record_failure(&mut self, task_index: usize, source: &str, kind: AdapterErrorKind, retry: u32) {
        if let Some(state) = self.states.get_mut(source) {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }
        self.set_status(task_index, source, SourceStatus::Retrying(retry), Some(kind));
    }

    fn give_up_task(&mut self, task_index: usize, source: &str, kind: AdapterErrorKind) {
        if let Some(state) = self.states.get_mut(source) {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }
        self.set_status(task_index, source, SourceStatus::Active, Some(kind));
    }

    fn disable(&mut self, task_index: usize, source: &str, reason: DisableReason, cause: Option<AdapterErrorKind>) {
        self.set_status(task_index, source, SourceStatus::Disabled(reason), cause);
    }

    fn learn_override(&mut self, source: &str, location: &str, replacement: &str) {
        if let Some(state) = self.states.get_mut(source) {
            state
                .location_overrides
                .insert(location.to_string(), replacement.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Results (possibly none) were returned.
    Succeeded,
    /// Retries ran out on a transient failure; the source stays active.
    Abandoned(AdapterErrorKind),
    /// The source is disabled for the rest of the run.
    SourceDisabled(DisableReason),
    /// The source was already disabled; no call was made.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub results: Vec<RawResult>,
    pub attempts: u32,
    pub backoff: Duration,
    /// Location string of the last attempt.
    pub location_used: String,
}

pub struct RetryController {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn mark_unsupported(&self, ctx: &mut RunContext, task: &SearchTask) {
        warn!(source = %task.source, "adapter cannot query source; disabling");
        ctx.disable(task.index, &task.source, DisableReason::Unsupported, None);
    }

    /// Run one task to completion: attempt, classify, back off, retry.
    ///
    /// `fallbacks` are alternate location strings for `task.location`, least
    /// specific last. Each adapter call is bounded by `call_timeout`.
    pub async fn run_task(
        &self,
        ctx: &mut RunContext,
        adapter: &dyn SourceAdapter,
        task: &SearchTask,
        fallbacks: &[String],
        call_timeout: Duration,
    ) -> TaskOutcome {
        let source = task.source.as_str();
        if ctx.is_disabled(source) {
            return TaskOutcome {
                status: TaskStatus::Skipped,
                results: Vec::new(),
                attempts: 0,
                backoff: Duration::ZERO,
                location_used: task.location.clone(),
            };
        }

        let mut current = match ctx.override_for(source, &task.location) {
            Some(location) => task.at_location(location),
            None => task.clone(),
        };
        let mut remaining = remaining_fallbacks(fallbacks, &current.location);

        let mut attempts = 0u32;
        let mut retries = 0u32;
        let mut backoff = Duration::ZERO;

        loop {
            attempts += 1;
            let result = match tokio::time::timeout(call_timeout, adapter.attempt(&current)).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout(format!(
                    "no response within {call_timeout:?}"
                ))),
            };

            let err = match result {
                Ok(results) => {
                    return self.succeed(ctx, task, current, results, attempts, backoff);
                }
                Err(AdapterError::Empty) => {
                    return self.succeed(ctx, task, current, Vec::new(), attempts, backoff);
                }
                Err(err) => err,
            };

            let kind = err.kind();
            warn!(
                source,
                location = %current.location,
                attempt = attempts,
                error = %err,
                "adapter call failed"
            );

            if kind == AdapterErrorKind::RateLimited {
                info!(source, "source rate limited; disabled for the rest of the run");
                ctx.disable(task.index, source, DisableReason::RateLimited, Some(kind));
                return TaskOutcome {
                    status: TaskStatus::SourceDisabled(DisableReason::RateLimited),
                    results: Vec::new(),
                    attempts,
                    backoff,
                    location_used: current.location,
                };
            }

            if retries >= self.policy.max_retries {
                if kind == AdapterErrorKind::BadRequest {
                    info!(source, "location rejected after all fallbacks; source disabled");
                    ctx.disable(task.index, source, DisableReason::BadRequest, Some(kind));
                    return TaskOutcome {
                        status: TaskStatus::SourceDisabled(DisableReason::BadRequest),
                        results: Vec::new(),
                        attempts,
                        backoff,
                        location_used: current.location,
                    };
                }
                info!(source, term = %task.term, "retries exhausted; abandoning task");
                ctx.give_up_task(task.index, source, kind);
                return TaskOutcome {
                    status: TaskStatus::Abandoned(kind),
                    results: Vec::new(),
                    attempts,
                    backoff,
                    location_used: current.location,
                };
            }

            retries += 1;
            ctx.record_failure(task.index, source, kind, retries);

            if kind == AdapterErrorKind::BadRequest && !remaining.is_empty() {
                let next = remaining.remove(0);
                debug!(source, from = %current.location, to = %next, "trying fallback location");
                current = task.at_location(next);
            }

            let delay = self.policy.delay_for_retry(retries);
            info!(source, retry = retries, delay_ms = delay.as_millis() as u64, "backing off");
            self.sleeper.sleep(delay).await;
            backoff += delay;
        }
    }

    fn succeed(
        &self,
        ctx: &mut RunContext,
        task: &SearchTask,
        current: SearchTask,
        results: Vec<RawResult>,
        attempts: u32,
        backoff: Duration,
    ) -> TaskOutcome {
        ctx.record_success(task.index, &task.source);
        if current.location != task.location {
            ctx.learn_override(&task.source, &task.location, &current.location);
        }
        TaskOutcome {
            status: TaskStatus::Succeeded,
            results,
            attempts,
            backoff,
            location_used: current.location,
        }
    }
}

/// Fallbacks still untried once `current` is in use.
fn remaining_fallbacks(fallbacks: &[String], current: &str) -> Vec<String> {
    match fallbacks.iter().position(|f| f == current) {
        Some(pos) => fallbacks[pos + 1..].to_vec(),
        None => fallbacks.to_vec(),
    }
}
