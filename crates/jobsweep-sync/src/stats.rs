//! Run statistics: the sole structured output of a collection run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use jobsweep_adapters::{AdapterErrorKind, AdapterVariant};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::{SourceState, SourceStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub tasks_planned: usize,
    pub tasks_attempted: usize,
    pub tasks_succeeded: usize,
    pub tasks_abandoned: usize,
    pub tasks_skipped: usize,
    pub attempts: usize,
    pub raw_seen: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub storage_failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCounts {
    pub normalized: usize,
    pub persisted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub task_index: usize,
    pub source: String,
    pub from: SourceStatus,
    pub to: SourceStatus,
    pub cause: Option<AdapterErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSwitch {
    pub from: AdapterVariant,
    pub to: AdapterVariant,
    pub after_task: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub adapter: AdapterVariant,
    pub planned_tasks: usize,
    pub raw_seen: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub storage_failures: usize,
    pub pacing_secs: f64,
    pub backoff_secs: f64,
    pub cancelled: bool,
    pub per_source: BTreeMap<String, SourceCounts>,
    pub per_location: BTreeMap<String, LocationCounts>,
    pub transitions: Vec<StateTransition>,
    pub adapter_switch: Option<AdapterSwitch>,
    pub final_states: BTreeMap<String, SourceState>,
}

impl RunStatistics {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, adapter: AdapterVariant) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            elapsed_secs: 0.0,
            adapter,
            planned_tasks: 0,
            raw_seen: 0,
            normalized: 0,
            rejected: 0,
            persisted: 0,
            duplicates: 0,
            storage_failures: 0,
            pacing_secs: 0.0,
            backoff_secs: 0.0,
            cancelled: false,
            per_source: BTreeMap::new(),
            per_location: BTreeMap::new(),
            transitions: Vec::new(),
            adapter_switch: None,
            final_states: BTreeMap::new(),
        }
    }

    pub fn source_mut(&mut self, source: &str) -> &mut SourceCounts {
        self.per_source.entry(source.to_string()).or_default()
    }

    pub fn location_mut(&mut self, location: &str) -> &mut LocationCounts {
        self.per_location.entry(location.to_string()).or_default()
    }

    pub fn record_raw(&mut self, source: &str) {
        self.raw_seen += 1;
        self.source_mut(source).raw_seen += 1;
    }

    pub fn record_rejected(&mut self, source: &str) {
        self.rejected += 1;
        self.source_mut(source).rejected += 1;
    }

    pub fn record_normalized(&mut self, source: &str, location: &str) {
        self.normalized += 1;
        self.source_mut(source).normalized += 1;
        self.location_mut(location).normalized += 1;
    }

    pub fn record_persisted(&mut self, source: &str, location: &str) {
        self.persisted += 1;
        self.source_mut(source).persisted += 1;
        self.location_mut(location).persisted += 1;
    }

    pub fn record_duplicate(&mut self, source: &str) {
        self.duplicates += 1;
        self.source_mut(source).duplicates += 1;
    }

    pub fn record_storage_failure(&mut self, source: &str) {
        self.storage_failures += 1;
        self.source_mut(source).storage_failures += 1;
    }

    pub fn disabled_sources(&self) -> Vec<&str> {
        self.final_states
            .iter()
            .filter(|(_, state)| matches!(state.status, SourceStatus::Disabled(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "run {}: seen={} normalized={} rejected={} new={} duplicates={} storage_failures={} in {:.1}s",
            self.run_id,
            self.raw_seen,
            self.normalized,
            self.rejected,
            self.persisted,
            self.duplicates,
            self.storage_failures,
            self.elapsed_secs
        )
    }
}
