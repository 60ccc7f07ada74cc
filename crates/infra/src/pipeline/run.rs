//! Per-execution context handed to a pipeline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cadence_core::JobId;
use cadence_events::{EventPublisher, JobEvent};

use crate::external::{CollaboratorError, RemoteState};
use crate::jobs::LifecycleEngine;

use super::PipelineError;

/// One observation of a remote asynchronous operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Pending,
    Ready(T),
    /// Remote side reported failure, with its status text.
    Failed(String),
}

impl<T> PollStatus<T> {
    pub fn from_state(state: RemoteState, value: T, status: &str) -> Self {
        match state {
            RemoteState::Pending => Self::Pending,
            RemoteState::Succeeded => Self::Ready(value),
            RemoteState::Failed => Self::Failed(status.to_string()),
        }
    }
}

/// Polling cadence for a remote operation.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Context of one pipeline execution.
///
/// Every wait goes through [`call`](Self::call) or [`poll`](Self::poll), which
/// race the work against the job's cancellation token.
pub struct JobRun {
    job_id: JobId,
    engine: Arc<LifecycleEngine>,
    publisher: Arc<dyn EventPublisher>,
    token: CancellationToken,
}

impl JobRun {
    pub fn new(
        job_id: JobId,
        engine: Arc<LifecycleEngine>,
        publisher: Arc<dyn EventPublisher>,
        token: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            engine,
            publisher,
            token,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Enter a step: record progress and broadcast it.
    ///
    /// Fails with `Canceled` when the token fired or the record is already
    /// terminal.
    pub fn step(&self, progress: u8, step: &str) -> Result<(), PipelineError> {
        if self.is_canceled() {
            return Err(PipelineError::Canceled);
        }
        let Some(job) = self.engine.advance_progress(self.job_id, progress, step)? else {
            return Err(PipelineError::Canceled);
        };
        debug!(job_id = %self.job_id, progress = job.progress, step, "step");
        self.publish(JobEvent::progress(self.job_id, job.progress, job.status, step));
        Ok(())
    }

    /// Await a collaborator call unless the job is canceled first.
    ///
    /// Failure is reported under `summary`; the raw error travels as source.
    pub async fn call<T, F>(&self, summary: &str, work: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, CollaboratorError>> + Send,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(PipelineError::Canceled),
            out = work => out.map_err(|source| PipelineError::collaborator(summary, source)),
        }
    }

    /// Poll a remote operation until it settles or `policy.deadline` passes.
    ///
    /// The first check runs immediately. Remote failure is reported under
    /// `summary`, an expired deadline under `timeout_summary`.
    pub async fn poll<T, F, Fut>(
        &self,
        summary: &str,
        timeout_summary: &str,
        policy: PollPolicy,
        mut check: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<PollStatus<T>, CollaboratorError>> + Send,
        T: Send,
    {
        let deadline = Instant::now() + policy.deadline;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.call(summary, check()).await? {
                PollStatus::Ready(value) => return Ok(value),
                PollStatus::Failed(status) => {
                    return Err(PipelineError::collaborator(
                        summary,
                        CollaboratorError::Remote(status),
                    ));
                }
                PollStatus::Pending => {
                    debug!(job_id = %self.job_id, attempt, "remote operation pending");
                }
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(PipelineError::Canceled),
                _ = tokio::time::sleep(policy.interval) => {}
            }

            if Instant::now() >= deadline {
                return Err(PipelineError::collaborator(
                    timeout_summary,
                    CollaboratorError::Timeout(policy.deadline),
                ));
            }
        }
    }

    pub(crate) fn publish(&self, event: JobEvent) {
        if let Err(e) = self.publisher.publish(event) {
            warn!(job_id = %self.job_id, error = %e, "event publish failed");
        }
    }
}
