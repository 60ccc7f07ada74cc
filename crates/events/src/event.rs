//! Wire types of the per-job event stream.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use cadence_core::{JobId, JobStatus};

/// Code attached to `error` events of failed render jobs.
pub const RENDER_FAILED: &str = "RENDER_FAILED";
/// Code attached to `error` events of failed master jobs.
pub const MASTER_FAILED: &str = "MASTER_FAILED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventError {
    pub code: String,
    pub message: String,
}

/// An event published for one job.
///
/// Serialised with a `type` tag:
///
/// ```text
/// {"type":"progress","jobId":"…","progress":40,"status":"running","currentStep":"…"}
/// {"type":"complete","jobId":"…","result":{…}}
/// {"type":"error","jobId":"…","error":{"code":"…","message":"…"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum JobEvent {
    Progress {
        job_id: JobId,
        progress: u8,
        status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_step: Option<String>,
    },
    Complete {
        job_id: JobId,
        result: JsonValue,
    },
    Error {
        job_id: JobId,
        error: EventError,
    },
}

impl JobEvent {
    pub fn progress(job_id: JobId, progress: u8, status: JobStatus, step: impl Into<String>) -> Self {
        Self::Progress {
            job_id,
            progress,
            status,
            current_step: Some(step.into()),
        }
    }

    pub fn complete(job_id: JobId, result: JsonValue) -> Self {
        Self::Complete { job_id, result }
    }

    pub fn error(job_id: JobId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            job_id,
            error: EventError {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::Complete { job_id, .. }
            | JobEvent::Error { job_id, .. } => *job_id,
        }
    }

    /// `complete` and `error` end a job's stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress { .. })
    }
}

/// Liveness messages exchanged with stream clients.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Ping,
    Pong,
}
