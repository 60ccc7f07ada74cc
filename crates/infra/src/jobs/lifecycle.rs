//! The lifecycle engine: the single place job records are read and written.
//!
//! ## Guarantees
//!
//! - **Serialised writes per job**: every mutation is a read-modify-write
//!   under that job's lock, so a submitter's cancel and a worker's progress
//!   update never interleave. Different jobs never wait on each other's
//!   store round-trips.
//! - **Terminal immutability**: once `succeeded`/`failed`/`canceled`, a record
//!   never changes again. Late progress updates are silent no-ops; late
//!   completions, failures and cancels return `AlreadyTerminal`.
//! - **Monotonic progress**: a lower progress value never overwrites a higher
//!   one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use cadence_core::{DomainError, Job, JobId, JobKind, JobStatus};

use super::store::{JobRecordStore, StoreError};

/// Lifecycle engine error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {job_id} already terminal ({status})")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    fn from_domain(job_id: JobId, err: DomainError) -> Self {
        match err {
            DomainError::AlreadyTerminal(status) => Self::AlreadyTerminal { job_id, status },
            other => Self::Store(StoreError::Storage(other.to_string())),
        }
    }
}

pub struct LifecycleEngine {
    store: Arc<dyn JobRecordStore>,
    /// Locks of jobs with a mutation in flight.
    job_locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine").finish_non_exhaustive()
    }
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn JobRecordStore>) -> Self {
        Self {
            store,
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn arc(store: Arc<dyn JobRecordStore>) -> Arc<Self> {
        Arc::new(Self::new(store))
    }

    /// Write a new `queued` record. Does not dispatch anything.
    pub fn create(&self, kind: JobKind, payload: JsonValue) -> Result<Job, LifecycleError> {
        let job = Job::new(kind, payload);
        self.store.insert(&job)?;
        info!(job_id = %job.id, kind = %kind, "job created");
        Ok(job)
    }

    pub fn get(&self, job_id: JobId) -> Result<Job, LifecycleError> {
        self.store
            .get(job_id)?
            .ok_or(LifecycleError::NotFound(job_id))
    }

    /// Record progress. `Ok(None)` means the job was already terminal and
    /// nothing changed.
    pub fn advance_progress(
        &self,
        job_id: JobId,
        progress: u8,
        step: impl Into<String>,
    ) -> Result<Option<Job>, LifecycleError> {
        let step = step.into();
        self.mutate(job_id, |job| Ok(job.advance(progress, step, Utc::now())))
            .map(|(job, changed)| changed.then_some(job))
    }

    pub fn complete(&self, job_id: JobId, result: JsonValue) -> Result<Job, LifecycleError> {
        let (job, _) = self.mutate(job_id, |job| job.succeed(result, Utc::now()).map(|_| true))?;
        info!(job_id = %job_id, "job succeeded");
        Ok(job)
    }

    pub fn fail(&self, job_id: JobId, error: impl Into<String>) -> Result<Job, LifecycleError> {
        let error = error.into();
        let (job, _) = self.mutate(job_id, |job| job.fail(error, Utc::now()).map(|_| true))?;
        info!(job_id = %job_id, "job failed");
        Ok(job)
    }

    /// Cancel a non-terminal job. The record flips immediately; stopping the
    /// running pipeline is the caller's concern.
    pub fn cancel(&self, job_id: JobId) -> Result<Job, LifecycleError> {
        let (job, _) = self.mutate(job_id, |job| job.cancel(Utc::now()).map(|_| true))?;
        info!(job_id = %job_id, "job canceled");
        Ok(job)
    }

    /// Count a queue redelivery. `Ok(None)` if the job was already terminal.
    pub fn record_redelivery(&self, job_id: JobId) -> Result<Option<Job>, LifecycleError> {
        self.mutate(job_id, |job| Ok(job.record_redelivery()))
            .map(|(job, changed)| changed.then_some(job))
    }

    /// Drop expired records from the store.
    pub fn purge_expired(&self) -> Result<usize, LifecycleError> {
        let purged = self.store.purge_expired()?;
        if purged > 0 {
            info!(purged, "expired job records purged");
        }
        Ok(purged)
    }

    /// Read, apply `f`, and write back only when `f` reports a change.
    fn mutate<F>(&self, job_id: JobId, f: F) -> Result<(Job, bool), LifecycleError>
    where
        F: FnOnce(&mut Job) -> Result<bool, DomainError>,
    {
        let lock = self.job_lock(job_id)?;
        let guard = lock.lock().map_err(|_| poisoned())?;
        let outcome = self.apply(job_id, f);
        self.release(job_id, &lock);
        drop(guard);
        outcome
    }

    fn apply<F>(&self, job_id: JobId, f: F) -> Result<(Job, bool), LifecycleError>
    where
        F: FnOnce(&mut Job) -> Result<bool, DomainError>,
    {
        let mut job = self
            .store
            .get(job_id)?
            .ok_or(LifecycleError::NotFound(job_id))?;

        let changed = f(&mut job).map_err(|e| LifecycleError::from_domain(job_id, e))?;
        if changed {
            self.store.put(&job)?;
        } else {
            debug!(job_id = %job_id, status = %job.status, "mutation ignored");
        }
        Ok((job, changed))
    }

    fn job_lock(&self, job_id: JobId) -> Result<Arc<Mutex<()>>, LifecycleError> {
        let mut locks = self.job_locks.lock().map_err(|_| poisoned())?;
        Ok(locks.entry(job_id).or_default().clone())
    }

    /// Forget the job's lock once no other mutation is waiting on it.
    /// Runs while the caller still holds the lock, after its write.
    fn release(&self, job_id: JobId, lock: &Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.job_locks.lock() {
            // One reference in the map, one held by the caller.
            if Arc::strong_count(lock) <= 2 {
                locks.remove(&job_id);
            }
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.job_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

fn poisoned() -> LifecycleError {
    StoreError::Storage("lifecycle lock poisoned".to_string()).into()
}
