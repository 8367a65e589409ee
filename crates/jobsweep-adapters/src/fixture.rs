//! Offline adapter that replays per-source JSON fixtures.
//!
//! A fixture file `<dir>/<source>.json` holds the rows the source returns and
//! an optional list of scripted outcomes consumed one per call before the rows
//! are served. This keeps demos and tests independent of live providers.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobsweep_core::{RawResult, SearchTask};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::Mutex;

use crate::{AdapterError, AdapterVariant, SourceAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOutcome {
    Rows,
    RateLimited,
    BadRequest,
    Timeout,
    Empty,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureScript {
    #[serde(default)]
    pub outcomes: Vec<FixtureOutcome>,
    #[serde(default)]
    pub rows: Vec<JsonMap<String, JsonValue>>,
}

pub fn load_fixture_script(path: impl AsRef<Path>) -> Result<FixtureScript> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub struct FixtureSourceAdapter {
    scripts: HashMap<String, FixtureScript>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FixtureSourceAdapter {
    pub fn new(scripts: HashMap<String, FixtureScript>) -> Self {
        Self {
            scripts,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Load every `*.json` file in `dir`, keyed by file stem.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut scripts = HashMap::new();
        let entries = fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
        for entry in entries {
            let path: PathBuf = entry
                .with_context(|| format!("listing {}", dir.display()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(source) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            scripts.insert(source.to_string(), load_fixture_script(&path)?);
        }
        Ok(Self::new(scripts))
    }

    pub async fn calls_for(&self, source: &str) -> usize {
        self.calls.lock().await.get(source).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SourceAdapter for FixtureSourceAdapter {
    fn variant(&self) -> AdapterVariant {
        AdapterVariant::Fixture
    }

    fn supports(&self, source: &str) -> bool {
        self.scripts.contains_key(source)
    }

    async fn attempt(&self, task: &SearchTask) -> Result<Vec<RawResult>, AdapterError> {
        let Some(script) = self.scripts.get(&task.source) else {
            return Err(AdapterError::Unknown(format!("no fixture for {}", task.source)));
        };

        let call = {
            let mut calls = self.calls.lock().await;
            let counter = calls.entry(task.source.clone()).or_default();
            *counter += 1;
            *counter - 1
        };

        let outcome = script.outcomes.get(call).copied().unwrap_or(FixtureOutcome::Rows);
        let detail = format!("scripted for {} call {}", task.source, call + 1);
        match outcome {
            FixtureOutcome::RateLimited => Err(AdapterError::RateLimited(detail)),
            FixtureOutcome::BadRequest => Err(AdapterError::BadRequest(detail)),
            FixtureOutcome::Timeout => Err(AdapterError::Timeout(detail)),
            FixtureOutcome::Unknown => Err(AdapterError::Unknown(detail)),
            FixtureOutcome::Empty => Err(AdapterError::Empty),
            FixtureOutcome::Rows if script.rows.is_empty() => Err(AdapterError::Empty),
            FixtureOutcome::Rows => Ok(script
                .rows
                .iter()
                .take(task.results_wanted.max(1) as usize)
                .map(|row| RawResult::api_row(&task.source, row.clone()))
                .collect()),
        }
    }
}
