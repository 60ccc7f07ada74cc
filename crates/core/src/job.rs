//! The job record and its state transitions.
//!
//! `Job` holds the pure transition rules (which fields change, which
//! transitions are legal). Reading and writing records, and serialising
//! concurrent access, is the lifecycle engine's job in `cadence-infra`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// How long a record lives after its last write.
pub const RECORD_TTL: Duration = Duration::hours(24);

/// Closed set of job kinds. Determines which pipeline processes a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Render,
    Master,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Render => "render",
            JobKind::Master => "master",
        }
    }

    /// Queue-level task type name.
    pub fn task_type(&self) -> &'static str {
        match self {
            JobKind::Render => "render:process",
            JobKind::Master => "master:process",
        }
    }

    /// Advertised wall-clock estimate returned at submission, in seconds.
    pub fn estimated_duration_secs(&self) -> u32 {
        match self {
            JobKind::Render => 45,
            JobKind::Master => 30,
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record of one submitted unit of async work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0-100, non-decreasing.
    pub progress: u8,
    /// Advisory label of the step in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Input parameters, serialised once at creation.
    pub payload: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Job {
    /// Create a new `queued` record with zero progress.
    pub fn new(kind: JobKind, payload: JsonValue) -> Self {
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Queued,
            progress: 0,
            current_step: None,
            error: None,
            payload,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a progress update.
    ///
    /// Returns `false` (and leaves every field untouched) when the job is
    /// already terminal. The first update on a `queued` job moves it to
    /// `running` and stamps `started_at`. A value lower than the recorded one
    /// never regresses `progress`.
    pub fn advance(&mut self, progress: u8, step: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.mark_running(now);
        self.progress = self.progress.max(progress.min(100));
        self.current_step = Some(step.into());
        true
    }

    /// Transition to `succeeded`, storing the result.
    pub fn succeed(&mut self, result: JsonValue, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_not_terminal()?;
        self.mark_running(now);
        self.status = JobStatus::Succeeded;
        self.progress = 100;
        self.result = Some(result);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Transition to `failed`, storing an error summary.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_not_terminal()?;
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Transition to `canceled` from `queued` or `running`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_not_terminal()?;
        self.status = JobStatus::Canceled;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Count a queue redelivery. Informational; ignored once terminal.
    pub fn record_redelivery(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.retry_count += 1;
        true
    }

    fn mark_running(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
        }
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    fn ensure_not_terminal(&self) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::AlreadyTerminal(self.status));
        }
        Ok(())
    }
}
