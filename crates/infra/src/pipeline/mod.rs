//! Worker pipelines: the ordered steps that fulfil one job kind.
//!
//! ## Design
//!
//! - **Steps**: a [`Pipeline`] reports each step through [`JobRun::step`],
//!   which records progress in the lifecycle engine and broadcasts it.
//! - **Cooperative cancellation**: every wait inside a pipeline races the
//!   job's cancellation token. A canceled pipeline stops at the next
//!   boundary and never records an outcome.
//! - **Outcomes**: [`PipelineHandler`] adapts a pipeline to the task queue.
//!   It owns the terminal transition (complete or fail) and the matching
//!   broadcast, so pipelines only produce a result or an error.
//! - **Sanitised failures**: collaborator errors are logged in full and
//!   recorded as a fixed summary.

pub mod master;
pub mod render;
pub mod run;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{Instrument, error, info, info_span, warn};

use cadence_core::{JobId, JobPayload};
use cadence_events::{EventPublisher, JobEvent};

use crate::external::CollaboratorError;
use crate::jobs::{CancellationRegistry, LifecycleEngine, LifecycleError};
use crate::queue::{Task, TaskBody, TaskHandler, TaskOutcome};

pub use master::MasterPipeline;
pub use render::{RenderPipeline, RenderPollSettings};
pub use run::{JobRun, PollPolicy, PollStatus};

/// Summary recorded when a payload fails to decode or validate.
pub const INVALID_PAYLOAD: &str = "Invalid payload";
const SAVE_FAILED: &str = "Failed to save result";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("{summary}")]
    Collaborator {
        summary: String,
        #[source]
        source: CollaboratorError,
    },
    #[error("job canceled")]
    Canceled,
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to encode result: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn collaborator(summary: impl Into<String>, source: CollaboratorError) -> Self {
        Self::Collaborator {
            summary: summary.into(),
            source,
        }
    }

    /// Client-safe description, recorded on the job.
    pub fn summary(&self) -> &str {
        match self {
            Self::Validation(_) => INVALID_PAYLOAD,
            Self::Collaborator { summary, .. } => summary,
            Self::Canceled => "Job canceled",
            Self::Lifecycle(_) | Self::Encoding(_) => SAVE_FAILED,
        }
    }
}

/// The steps of one job kind.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    type Payload: JobPayload;

    /// Code on broadcast `error` events.
    const ERROR_CODE: &'static str;

    /// Summary recorded when the queue gives up on the task.
    const ABANDONED_SUMMARY: &'static str;

    /// Run every step and return the serialised result.
    async fn run(&self, run: &JobRun, payload: Self::Payload) -> Result<JsonValue, PipelineError>;
}

/// Adapts a [`Pipeline`] to a queue lane.
pub struct PipelineHandler<P: Pipeline> {
    pipeline: P,
    engine: Arc<LifecycleEngine>,
    publisher: Arc<dyn EventPublisher>,
    cancellations: CancellationRegistry,
}

impl<P: Pipeline> PipelineHandler<P> {
    pub fn new(
        pipeline: P,
        engine: Arc<LifecycleEngine>,
        publisher: Arc<dyn EventPublisher>,
        cancellations: CancellationRegistry,
    ) -> Self {
        Self {
            pipeline,
            engine,
            publisher,
            cancellations,
        }
    }

    async fn execute(&self, task: &Task, body: TaskBody) -> TaskOutcome {
        let job_id = body.job_id;

        if task.retried > 0 {
            match self.engine.record_redelivery(job_id) {
                Ok(_) => {}
                Err(LifecycleError::NotFound(_)) => return TaskOutcome::Abandon("job record not found".into()),
                Err(e) => return TaskOutcome::Retry(e.to_string()),
            }
        }

        match self.engine.get(job_id) {
            Ok(job) if job.status.is_terminal() => {
                info!(status = %job.status, "job already terminal; delivery skipped");
                return TaskOutcome::Done;
            }
            Ok(_) => {}
            Err(LifecycleError::NotFound(_)) => return TaskOutcome::Abandon("job record not found".into()),
            Err(e) => return TaskOutcome::Retry(e.to_string()),
        }

        let payload = match decode_payload::<P::Payload>(body.payload) {
            Ok(payload) => payload,
            Err(reason) => {
                warn!(reason = %reason, "payload rejected");
                self.fail(job_id, INVALID_PAYLOAD);
                return TaskOutcome::Abandon(reason);
            }
        };

        let guard = self.cancellations.register(job_id, task.id);
        // A cancel that landed before registration had no token to signal.
        if self.engine.get(job_id).is_ok_and(|job| job.status.is_terminal()) {
            info!("job finished before pipeline start");
            return TaskOutcome::Done;
        }

        info!("pipeline started");
        let run = JobRun::new(job_id, self.engine.clone(), self.publisher.clone(), guard.token().clone());
        let outcome = self.pipeline.run(&run, payload).await;
        drop(guard);

        match outcome {
            Ok(result) => self.complete(job_id, result),
            Err(PipelineError::Canceled) => {
                info!("pipeline stopped: job canceled");
                TaskOutcome::Done
            }
            Err(PipelineError::Lifecycle(LifecycleError::AlreadyTerminal { status, .. })) => {
                info!(status = %status, "pipeline stopped: job already terminal");
                TaskOutcome::Done
            }
            Err(PipelineError::Lifecycle(LifecycleError::NotFound(_))) => {
                warn!("job record expired mid-run");
                TaskOutcome::Abandon("job record not found".into())
            }
            Err(PipelineError::Lifecycle(e @ LifecycleError::Store(_))) => {
                warn!(error = %e, "record store unavailable");
                TaskOutcome::Retry(e.to_string())
            }
            Err(e @ PipelineError::Validation(_)) => {
                warn!(error = %e, "payload rejected by pipeline");
                self.fail(job_id, e.summary());
                TaskOutcome::Abandon(e.to_string())
            }
            Err(e @ PipelineError::Collaborator { .. }) => {
                let detail = std::error::Error::source(&e)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                error!(summary = e.summary(), error = %detail, "pipeline step failed");
                self.fail(job_id, e.summary());
                TaskOutcome::Done
            }
            Err(e @ PipelineError::Encoding(_)) => {
                error!(error = %e, "result encoding failed");
                self.fail(job_id, e.summary());
                TaskOutcome::Done
            }
        }
    }

    fn complete(&self, job_id: JobId, result: JsonValue) -> TaskOutcome {
        match self.engine.complete(job_id, result) {
            Ok(job) => {
                info!("job completed");
                self.publish(JobEvent::complete(job_id, job.result.unwrap_or(JsonValue::Null)));
                TaskOutcome::Done
            }
            Err(LifecycleError::AlreadyTerminal { status, .. }) => {
                info!(status = %status, "result discarded: job already terminal");
                TaskOutcome::Done
            }
            Err(LifecycleError::NotFound(_)) => TaskOutcome::Abandon("job record not found".into()),
            Err(e) => TaskOutcome::Retry(e.to_string()),
        }
    }

    /// Record a failure and broadcast it. No-op on a terminal job.
    fn fail(&self, job_id: JobId, summary: &str) {
        match self.engine.fail(job_id, summary) {
            Ok(_) => self.publish(JobEvent::error(job_id, P::ERROR_CODE, summary)),
            Err(LifecycleError::AlreadyTerminal { status, .. }) => {
                info!(status = %status, "failure not recorded: job already terminal");
            }
            Err(e) => warn!(error = %e, "failed to record job failure"),
        }
    }

    fn publish(&self, event: JobEvent) {
        if let Err(e) = self.publisher.publish(event) {
            warn!(error = %e, "event publish failed");
        }
    }
}

fn decode_payload<T: JobPayload>(raw: JsonValue) -> Result<T, String> {
    let payload: T = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    payload.validate().map_err(|e| e.to_string())?;
    Ok(payload)
}

#[async_trait]
impl<P: Pipeline> TaskHandler for PipelineHandler<P> {
    async fn handle(&self, task: &Task) -> TaskOutcome {
        let body = match task.decode_body() {
            Ok(body) => body,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "malformed task body");
                return TaskOutcome::Abandon(format!("malformed task body: {e}"));
            }
        };

        let span = info_span!(
            "pipeline",
            job_id = %body.job_id,
            task_type = task.task_type(),
            task_id = %task.id,
            attempt = task.retried,
        );
        self.execute(task, body).instrument(span).await
    }

    async fn abandoned(&self, task: &Task, reason: &str) {
        let Ok(body) = task.decode_body() else {
            return;
        };
        warn!(job_id = %body.job_id, reason, "task abandoned; failing job");
        self.fail(body.job_id, P::ABANDONED_SUMMARY);
    }
}
