//! Task queue types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use cadence_core::{JobId, JobKind, TaskId};

/// Named, independently concurrency-bounded partition of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Render,
    Master,
}

impl Lane {
    pub fn name(&self) -> &'static str {
        match self {
            Lane::Render => "render",
            Lane::Master => "master",
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Lane::Render => JobKind::Render,
            Lane::Master => JobKind::Master,
        }
    }
}

impl From<JobKind> for Lane {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Render => Lane::Render,
            JobKind::Master => Lane::Master,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Serialised body of a task: which job, with which input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBody {
    pub job_id: JobId,
    pub payload: JsonValue,
}

/// Queue-level unit of dispatch.
///
/// Independent of the job record: its own id, retry budget and retention.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub lane: Lane,
    /// JSON-encoded [`TaskBody`].
    pub body: Vec<u8>,
    /// Number of redeliveries so far (0 on first delivery).
    pub retried: u32,
    pub max_retry: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(lane: Lane, body: Vec<u8>, max_retry: u32) -> Self {
        Self {
            id: TaskId::new(),
            lane,
            body,
            retried: 0,
            max_retry,
            enqueued_at: Utc::now(),
        }
    }

    /// Task type name, e.g. `render:process`.
    pub fn task_type(&self) -> &'static str {
        self.lane.kind().task_type()
    }

    /// Whether a retryable outcome may be redelivered.
    pub fn can_retry(&self) -> bool {
        self.retried < self.max_retry
    }

    pub fn decode_body(&self) -> Result<TaskBody, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// What a handler reports for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The job reached (or already had) its outcome. Do not redeliver.
    Done,
    /// Transient failure; redeliver if the retry budget allows.
    Retry(String),
    /// Permanent failure (e.g. malformed payload); never redeliver.
    Abandon(String),
}

/// Redelivery budget and backoff.
///
/// The delay doubles with each redelivery, from `base_delay` up to
/// `max_delay`. Equal bounds give a fixed delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Redeliveries allowed after the first attempt.
    pub max_retry: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retry: 0,
            ..Self::default()
        }
    }

    pub fn fixed(max_retry: u32, delay: Duration) -> Self {
        Self::exponential(max_retry, delay, delay)
    }

    pub fn exponential(max_retry: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retry,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay before redelivery number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(doublings) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_redelivery() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::exponential(10, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(5));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(250));
        for attempt in 1..=3 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn task_retry_budget() {
        let mut task = Task::new(Lane::Master, Vec::new(), 2);
        assert!(task.can_retry());
        task.retried = 2;
        assert!(!task.can_retry());
        assert!(!Task::new(Lane::Render, Vec::new(), 0).can_retry());
    }

    #[test]
    fn task_body_wire_shape() {
        let job_id = JobId::new();
        let body = TaskBody {
            job_id,
            payload: serde_json::json!({"projectId": "p"}),
        };
        let task = Task::new(Lane::Render, serde_json::to_vec(&body).unwrap(), 3);

        let raw: JsonValue = serde_json::from_slice(&task.body).unwrap();
        assert_eq!(raw["jobId"], job_id.to_string());
        assert_eq!(task.task_type(), "render:process");
        assert_eq!(task.decode_body().unwrap(), body);
    }

    #[test]
    fn lanes_map_to_job_kinds() {
        assert_eq!(Lane::from(JobKind::Master), Lane::Master);
        assert_eq!(Lane::Master.kind(), JobKind::Master);
        let task = Task::new(Lane::Master, Vec::new(), 0);
        assert_eq!(task.task_type(), "master:process");
    }
}
