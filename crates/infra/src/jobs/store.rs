//! Job record storage.
//!
//! Records are keyed by job id and carry a TTL that is refreshed on every
//! write: an actively progressing job stays alive, a stalled one expires.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use cadence_core::{Job, JobId, RECORD_TTL};

/// Job record store abstraction.
///
/// Plain reads and writes only. Transition rules and write serialisation
/// live in the [`LifecycleEngine`](super::LifecycleEngine).
pub trait JobRecordStore: Send + Sync {
    /// Write a new record. Fails if the id is already present.
    fn insert(&self, job: &Job) -> Result<(), StoreError>;

    /// Read a live record. Expired records read as `None`.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Overwrite a record and refresh its TTL.
    fn put(&self, job: &Job) -> Result<(), StoreError>;

    /// Drop expired records. Returns how many were removed.
    fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// Job record store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("record encoding error: {0}")]
    Encoding(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Default record TTL as a std duration.
pub fn default_ttl() -> Duration {
    RECORD_TTL.to_std().unwrap_or(Duration::from_secs(24 * 60 * 60))
}

#[derive(Debug, Clone)]
struct Entry {
    job: Job,
    expires_at: Instant,
}

/// In-memory record store for tests/dev, with TTL semantics.
#[derive(Debug)]
pub struct InMemoryJobRecordStore {
    records: RwLock<HashMap<JobId, Entry>>,
    ttl: Duration,
}

impl InMemoryJobRecordStore {
    pub fn new() -> Self {
        Self::with_ttl(default_ttl())
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, job: &Job) -> Entry {
        Entry {
            job: job.clone(),
            expires_at: Instant::now() + self.ttl,
        }
    }
}

impl Default for InMemoryJobRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Storage("record store lock poisoned".to_string())
}

impl JobRecordStore for InMemoryJobRecordStore {
    fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let now = Instant::now();
        if records.get(&job.id).is_some_and(|e| e.expires_at > now) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        records.insert(job.id, self.entry(job));
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let now = Instant::now();
        Ok(records
            .get(&job_id)
            .filter(|e| e.expires_at > now)
            .map(|e| e.job.clone()))
    }

    fn put(&self, job: &Job) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(job.id, self.entry(job));
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let now = Instant::now();
        let before = records.len();
        records.retain(|_, e| e.expires_at > now);
        Ok(before - records.len())
    }
}

impl<S> JobRecordStore for Arc<S>
where
    S: JobRecordStore + ?Sized,
{
    fn insert(&self, job: &Job) -> Result<(), StoreError> {
        (**self).insert(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        (**self).get(job_id)
    }

    fn put(&self, job: &Job) -> Result<(), StoreError> {
        (**self).put(job)
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        (**self).purge_expired()
    }
}
