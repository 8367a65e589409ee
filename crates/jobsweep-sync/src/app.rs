//! Process-level settings and adapter/store wiring for binaries.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use jobsweep_adapters::{
    ApiSourceAdapter, BrowserSourceAdapter, FixtureSourceAdapter, HttpClientConfig, HttpFetcher,
    SourceAdapter,
};
use jobsweep_storage::{MemoryJobStore, PersistenceGateway, PgJobStore};
use tracing::info;

use crate::config::CollectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => bail!("unknown store `{other}` (expected postgres or memory)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Api,
    Browser,
    Fixture,
}

impl FromStr for AdapterKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "browser" => Ok(Self::Browser),
            "fixture" | "fixtures" => Ok(Self::Fixture),
            other => bail!("unknown adapter `{other}` (expected api, browser or fixture)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub config_path: PathBuf,
    pub store: StoreKind,
    pub adapter: AdapterKind,
    pub api_url: String,
    pub chrome_bin: String,
    pub user_agent: String,
    pub fixtures_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let store = match lookup("JOBSWEEP_STORE") {
            Some(v) => v.parse::<StoreKind>().context("JOBSWEEP_STORE")?,
            None if database_url.is_some() => StoreKind::Postgres,
            None => StoreKind::Memory,
        };
        let adapter = match lookup("JOBSWEEP_ADAPTER") {
            Some(v) => v.parse::<AdapterKind>().context("JOBSWEEP_ADAPTER")?,
            None => AdapterKind::Api,
        };
        Ok(Self {
            database_url,
            config_path: lookup("JOBSWEEP_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("collection.yaml")),
            store,
            adapter,
            api_url: lookup("JOBSWEEP_API_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            chrome_bin: lookup("JOBSWEEP_CHROME_BIN").unwrap_or_else(|| "chromium".to_string()),
            user_agent: lookup("JOBSWEEP_USER_AGENT")
                .unwrap_or_else(|| "jobsweep/0.1".to_string()),
            fixtures_dir: lookup("JOBSWEEP_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("fixtures")),
        })
    }

    /// Primary adapter plus the alternate variant to switch to, if any.
    pub fn adapters(
        &self,
        config: &CollectionConfig,
    ) -> Result<(Arc<dyn SourceAdapter>, Option<Arc<dyn SourceAdapter>>)> {
        let primary = self.build_adapter(self.adapter, config)?;
        let fallback = match self.adapter {
            AdapterKind::Api => Some(self.build_adapter(AdapterKind::Browser, config)?),
            AdapterKind::Browser | AdapterKind::Fixture => None,
        };
        Ok((primary, fallback))
    }

    pub fn build_adapter(
        &self,
        kind: AdapterKind,
        config: &CollectionConfig,
    ) -> Result<Arc<dyn SourceAdapter>> {
        let longest_call = config
            .sources
            .iter()
            .map(|s| config.call_timeout_for(&s.name))
            .max()
            .unwrap_or(Duration::from_secs(config.call_timeout_secs));

        let adapter: Arc<dyn SourceAdapter> = match kind {
            AdapterKind::Api => {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: longest_call,
                    user_agent: Some(self.user_agent.clone()),
                    ..Default::default()
                })?;
                let sites = config.enabled_sources().map(|s| s.name.clone()).collect();
                Arc::new(ApiSourceAdapter::new(http, self.api_url.clone(), sites))
            }
            AdapterKind::Browser => {
                let templates = config
                    .sources
                    .iter()
                    .filter_map(|s| s.browser_url.clone().map(|url| (s.name.clone(), url)))
                    .collect::<BTreeMap<_, _>>();
                Arc::new(BrowserSourceAdapter::new(
                    self.chrome_bin.clone(),
                    templates,
                    longest_call,
                ))
            }
            AdapterKind::Fixture => Arc::new(
                FixtureSourceAdapter::from_dir(&self.fixtures_dir).with_context(|| {
                    format!("loading fixtures from {}", self.fixtures_dir.display())
                })?,
            ),
        };
        Ok(adapter)
    }

    pub async fn gateway(&self) -> Result<Arc<dyn PersistenceGateway>> {
        match self.store {
            StoreKind::Memory => {
                info!("using in-memory store; records are dropped at exit");
                Ok(Arc::new(MemoryJobStore::new()))
            }
            StoreKind::Postgres => {
                let url = self
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL is required for the postgres store")?;
                let store = PgJobStore::connect(url)
                    .await
                    .context("connecting to postgres")?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config;
    use jobsweep_adapters::AdapterVariant;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_pick_memory_store_without_database() {
        let app = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(app.store, StoreKind::Memory);
        assert_eq!(app.adapter, AdapterKind::Api);
        assert_eq!(app.config_path, PathBuf::from("collection.yaml"));

        let app = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x/y")])).unwrap();
        assert_eq!(app.store, StoreKind::Postgres);
    }

    #[test]
    fn bad_choices_are_errors() {
        assert!(AppConfig::from_lookup(lookup(&[("JOBSWEEP_ADAPTER", "selenium")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("JOBSWEEP_STORE", "sqlite")])).is_err());
        assert_eq!("Browser".parse::<AdapterKind>().unwrap(), AdapterKind::Browser);
    }

    #[test]
    fn api_primary_carries_browser_fallback() {
        let mut cfg = config(&["Dados"], &["São Paulo"], &["linkedin", "indeed"]);
        cfg.sources[0].browser_url =
            Some("https://www.linkedin.com/jobs/search?keywords={term}&location={location}".into());
        let app = AppConfig::from_lookup(lookup(&[])).unwrap();

        let (primary, fallback) = app.adapters(&cfg).unwrap();
        assert_eq!(primary.variant(), AdapterVariant::Api);
        let fallback = fallback.unwrap();
        assert_eq!(fallback.variant(), AdapterVariant::Browser);
        assert!(fallback.supports("linkedin"));
        assert!(!fallback.supports("indeed"));
    }

    #[tokio::test]
    async fn postgres_store_needs_a_url() {
        let app = AppConfig::from_lookup(lookup(&[("JOBSWEEP_STORE", "postgres")])).unwrap();
        assert!(app.gateway().await.is_err());
    }
}
