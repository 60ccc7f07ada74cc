//! Job submission API: create, inspect, cancel.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{error, info};

use cadence_core::{DomainError, Job, JobId, JobKind, JobPayload, JobStatus};

use super::{CancellationRegistry, LifecycleEngine, LifecycleError};
use crate::queue::{Lane, QueueError, TaskBody, TaskQueue};

const ENQUEUE_FAILED: &str = "Failed to enqueue job";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("job {job_id} has not completed (status {status})")]
    NotCompleted { job_id: JobId, status: JobStatus },
    #[error("task queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Entry point for submitters.
///
/// Every query is scoped to one job kind: a job of another kind reads as
/// not found.
pub struct JobService {
    engine: Arc<LifecycleEngine>,
    queue: Arc<dyn TaskQueue>,
    cancellations: CancellationRegistry,
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService").finish_non_exhaustive()
    }
}

impl JobService {
    pub fn new(
        engine: Arc<LifecycleEngine>,
        queue: Arc<dyn TaskQueue>,
        cancellations: CancellationRegistry,
    ) -> Self {
        Self {
            engine,
            queue,
            cancellations,
        }
    }

    /// Validate, record and dispatch a job.
    ///
    /// The record is written before the task exists. If dispatch fails the
    /// record is failed so it never sits in `queued` forever.
    pub fn create_job<P: JobPayload>(&self, payload: &P) -> Result<Job, ServiceError> {
        payload.validate()?;
        let payload = serde_json::to_value(payload).map_err(|e| ServiceError::Validation(e.to_string()))?;

        let job = self.engine.create(P::KIND, payload.clone())?;
        let body = TaskBody {
            job_id: job.id,
            payload,
        };

        if let Err(e) = self.queue.enqueue(Lane::from(P::KIND), &body) {
            error!(job_id = %job.id, error = %e, "enqueue failed");
            if let Err(fail_err) = self.engine.fail(job.id, ENQUEUE_FAILED) {
                error!(job_id = %job.id, error = %fail_err, "failed to record enqueue failure");
            }
            return Err(e.into());
        }

        info!(job_id = %job.id, kind = %P::KIND, "job submitted");
        Ok(job)
    }

    pub fn get_job_status(&self, kind: JobKind, job_id: JobId) -> Result<Job, ServiceError> {
        let job = self.engine.get(job_id)?;
        if job.kind != kind {
            return Err(LifecycleError::NotFound(job_id).into());
        }
        Ok(job)
    }

    /// The result of a succeeded job.
    pub fn get_job_result(&self, kind: JobKind, job_id: JobId) -> Result<JsonValue, ServiceError> {
        let job = self.get_job_status(kind, job_id)?;
        match (job.status, job.result) {
            (JobStatus::Succeeded, Some(result)) => Ok(result),
            (status, _) => Err(ServiceError::NotCompleted { job_id, status }),
        }
    }

    /// Cancel a non-terminal job and signal its running pipeline, if any.
    pub fn cancel_job(&self, kind: JobKind, job_id: JobId) -> Result<Job, ServiceError> {
        self.get_job_status(kind, job_id)?;
        let job = self.engine.cancel(job_id)?;
        let signalled = self.cancellations.cancel(job_id);
        info!(job_id = %job_id, signalled, "cancel requested");
        Ok(job)
    }
}
