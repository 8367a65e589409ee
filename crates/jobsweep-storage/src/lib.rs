//! Persistence gateway for collected job listings.
//!
//! The fingerprint is the store's primary key. An insert that collides with an
//! existing key is reported as [`InsertOutcome::AlreadyExists`], never as an
//! error, so concurrent writers cannot produce duplicate rows.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsweep_core::{CanonicalRecord, Fingerprint};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "jobsweep-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError>;

    async fn insert(
        &self,
        record: &CanonicalRecord,
        fingerprint: &Fingerprint,
    ) -> Result<InsertOutcome, StorageError>;
}

#[derive(Debug, Clone)]
pub struct StoredJob {
    pub record: CanonicalRecord,
    pub collected_at: DateTime<Utc>,
}

/// Process-local store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    rows: Mutex<BTreeMap<Fingerprint, StoredJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<StoredJob> {
        self.rows.lock().await.get(fingerprint).cloned()
    }

    pub async fn records(&self) -> Vec<CanonicalRecord> {
        self.rows
            .lock()
            .await
            .values()
            .map(|row| row.record.clone())
            .collect()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryJobStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError> {
        Ok(self.rows.lock().await.contains_key(fingerprint))
    }

    async fn insert(
        &self,
        record: &CanonicalRecord,
        fingerprint: &Fingerprint,
    ) -> Result<InsertOutcome, StorageError> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(fingerprint) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        rows.insert(
            fingerprint.clone(),
            StoredJob {
                record: record.clone(),
                collected_at: Utc::now(),
            },
        );
        Ok(InsertOutcome::Inserted)
    }
}

/// Postgres-backed store. Expects a `job_listings` table keyed by `id`
/// (the fingerprint) with a `collected_at` column defaulting to `now()`.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PgJobStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, StorageError> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM job_listings WHERE id = $1)")
                .bind(fingerprint.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    async fn insert(
        &self,
        record: &CanonicalRecord,
        fingerprint: &Fingerprint,
    ) -> Result<InsertOutcome, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_listings (
                id, title, company, location, description, url, date_posted,
                job_type, is_remote, salary, source, search_term, search_location, region
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(fingerprint.as_str())
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.location)
        .bind(&record.description)
        .bind(&record.url)
        .bind(&record.date_posted)
        .bind(&record.job_type)
        .bind(record.remote)
        .bind(&record.salary)
        .bind(&record.source)
        .bind(&record.search_term)
        .bind(&record.search_location)
        .bind(record.region.as_deref())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                debug!(fingerprint = %fingerprint, "insert skipped by primary key conflict");
                Ok(InsertOutcome::AlreadyExists)
            }
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(err) => Err(err.into()),
        }
    }
}
