//! Run-scoped duplicate detection in front of the persistence gateway.

use std::collections::HashSet;

use jobsweep_core::{CanonicalRecord, Fingerprint};
use jobsweep_storage::{PersistenceGateway, StorageError};

#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<Fingerprint>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(fingerprint, true)` only when the record is in neither this run's
    /// set nor the store. A `true` must be followed by [`reserve`](Self::reserve)
    /// before the record is written.
    pub async fn is_new(
        &self,
        record: &CanonicalRecord,
        gateway: &dyn PersistenceGateway,
    ) -> Result<(Fingerprint, bool), StorageError> {
        let fingerprint = record.fingerprint();
        if self.seen.contains(&fingerprint) {
            return Ok((fingerprint, false));
        }
        let stored = gateway.exists(&fingerprint).await?;
        Ok((fingerprint, !stored))
    }

    /// Returns false when the fingerprint was already reserved.
    pub fn reserve(&mut self, fingerprint: Fingerprint) -> bool {
        self.seen.insert(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsweep_core::UNKNOWN;
    use jobsweep_storage::{InsertOutcome, MemoryJobStore};

    fn record(url: &str) -> CanonicalRecord {
        CanonicalRecord {
            title: "Engenheiro de Dados".into(),
            company: "Acme".into(),
            location: "São Paulo, SP".into(),
            description: UNKNOWN.into(),
            url: url.into(),
            date_posted: UNKNOWN.into(),
            job_type: UNKNOWN.into(),
            remote: None,
            salary: UNKNOWN.into(),
            source: "linkedin".into(),
            search_term: "Dados".into(),
            search_location: "São Paulo, SP, Brasil".into(),
            region: Some("SP".into()),
        }
    }

    #[tokio::test]
    async fn in_run_reservation_short_circuits_store() {
        let store = MemoryJobStore::new();
        let mut dedup = Deduplicator::new();
        let rec = record("https://jobs.example/1");

        let (fp, new) = dedup.is_new(&rec, &store).await.unwrap();
        assert!(new);
        assert!(dedup.reserve(fp.clone()));

        // Reserved but not yet written: still a duplicate.
        let (again, new) = dedup.is_new(&rec, &store).await.unwrap();
        assert_eq!(again, fp);
        assert!(!new);
        assert!(!dedup.reserve(fp));
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test]
    async fn records_already_stored_are_not_new() {
        let store = MemoryJobStore::new();
        let rec = record("https://jobs.example/2");
        let outcome = store.insert(&rec, &rec.fingerprint()).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let dedup = Deduplicator::new();
        let (_, new) = dedup.is_new(&rec, &store).await.unwrap();
        assert!(!new);
        assert!(dedup.is_empty());
    }
}
