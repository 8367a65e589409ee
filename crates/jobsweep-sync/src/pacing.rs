//! Pacing between provider calls.
//!
//! All waits go through a [`Sleeper`] so runs can be driven without wall-clock
//! delays (dry runs, tests).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobsweep_core::SearchTask;
use rand::Rng;
use tracing::info;

use crate::config::{DelayRange, PacingPolicy};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested waits and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.recorded().into_iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    BetweenTasks,
    BetweenTerms,
    BetweenLocations,
}

pub fn pause_kind(previous: &SearchTask, next: &SearchTask) -> PauseKind {
    if previous.location != next.location {
        PauseKind::BetweenLocations
    } else if previous.term != next.term {
        PauseKind::BetweenTerms
    } else {
        PauseKind::BetweenTasks
    }
}

pub fn pick_delay(range: DelayRange) -> Duration {
    let secs = if range.max_secs > range.min_secs {
        rand::rng().random_range(range.min_secs..=range.max_secs)
    } else {
        range.min_secs
    };
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

pub struct Pacer {
    policy: PacingPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Pacer {
    pub fn new(policy: PacingPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    fn range_for(&self, kind: PauseKind) -> DelayRange {
        match kind {
            PauseKind::BetweenTasks => self.policy.between_tasks,
            PauseKind::BetweenTerms => self.policy.between_terms,
            PauseKind::BetweenLocations => self.policy.between_locations,
        }
    }

    /// Wait before `next`, given the last task that actually reached a provider.
    pub async fn pause_between(&self, previous: &SearchTask, next: &SearchTask) -> Duration {
        let kind = pause_kind(previous, next);
        let delay = pick_delay(self.range_for(kind));
        if !delay.is_zero() {
            info!(?kind, delay_ms = delay.as_millis() as u64, "pacing before next task");
            self.sleeper.sleep(delay).await;
        }
        delay
    }

    pub async fn pause_fixed(&self, delay: Duration) -> Duration {
        if !delay.is_zero() {
            self.sleeper.sleep(delay).await;
        }
        delay
    }
}
