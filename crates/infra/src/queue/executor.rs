//! In-process task queue with per-lane worker pools, retry and lease.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cadence_core::{JobId, TaskId};

use super::types::{Lane, RetryPolicy, Task, TaskBody, TaskOutcome};

/// Processes tasks delivered on one lane.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Handle one delivery. May be called again for the same task after a
    /// retryable outcome, a panic, or lease expiry.
    async fn handle(&self, task: &Task) -> TaskOutcome;

    /// Called once when a task is dropped after exhausting its retry budget.
    async fn abandoned(&self, _task: &Task, _reason: &str) {}
}

/// Submission side of the queue.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, lane: Lane, body: &TaskBody) -> Result<TaskId, QueueError>;
}

impl<Q> TaskQueue for Arc<Q>
where
    Q: TaskQueue + ?Sized,
{
    fn enqueue(&self, lane: Lane, body: &TaskBody) -> Result<TaskId, QueueError> {
        (**self).enqueue(lane, body)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,
    #[error("no workers registered for lane {0}")]
    UnknownLane(Lane),
    #[error("failed to serialize task body: {0}")]
    Serialize(String),
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker pool size per lane
    pub concurrency: HashMap<Lane, usize>,
    pub retry: RetryPolicy,
    /// Longest a single delivery may run before it is abandoned and redelivered
    pub lease: Duration,
    /// How long finished task records are kept
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: HashMap::from([(Lane::Render, 6), (Lane::Master, 4)]),
            retry: RetryPolicy::default(),
            lease: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(mut self, lane: Lane, workers: usize) -> Self {
        self.concurrency.insert(lane, workers.max(1));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn workers_for(&self, lane: Lane) -> usize {
        self.concurrency.get(&lane).copied().unwrap_or(1).max(1)
    }
}

/// Queue runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    /// Deliveries that ran to an outcome
    pub processed: u64,
    pub succeeded: u64,
    /// Deliveries that ended retryable (error, panic, lease expiry)
    pub failed: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub running: HashMap<Lane, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Completed,
    Abandoned,
}

/// A finished task, kept for the retention window.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub lane: Lane,
    pub job_id: Option<JobId>,
    pub state: TaskState,
    pub retried: u32,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Shared {
    config: QueueConfig,
    stats: Mutex<QueueStats>,
    finished: Mutex<VecDeque<TaskRecord>>,
}

impl Shared {
    fn update_stats(&self, f: impl FnOnce(&mut QueueStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn record_finished(&self, task: &Task, state: TaskState) {
        let record = TaskRecord {
            task_id: task.id,
            lane: task.lane,
            job_id: task.decode_body().ok().map(|b| b.job_id),
            state,
            retried: task.retried,
            enqueued_at: task.enqueued_at,
            finished_at: Utc::now(),
        };
        if let Ok(mut finished) = self.finished.lock() {
            finished.push_back(record);
            prune(&mut finished, self.config.retention);
        }
    }
}

fn prune(finished: &mut VecDeque<TaskRecord>, retention: Duration) {
    let Ok(retention) = chrono::Duration::from_std(retention) else {
        return;
    };
    let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
        return;
    };
    while finished.front().is_some_and(|r| r.finished_at < cutoff) {
        finished.pop_front();
    }
}

/// Collects lane handlers before the queue starts.
pub struct TaskQueueBuilder {
    config: QueueConfig,
    handlers: HashMap<Lane, Arc<dyn TaskHandler>>,
}

impl TaskQueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for a lane.
    pub fn register(mut self, lane: Lane, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(lane, handler);
        self
    }

    /// Spawn one dispatcher per registered lane on the current runtime.
    pub fn start(self) -> InProcessTaskQueue {
        let shared = Arc::new(Shared {
            config: self.config,
            stats: Mutex::new(QueueStats::default()),
            finished: Mutex::new(VecDeque::new()),
        });
        let shutdown = CancellationToken::new();
        let mut senders = HashMap::new();
        let mut workers = Vec::new();

        for (lane, handler) in self.handlers {
            let (tx, rx) = mpsc::unbounded_channel();
            let concurrency = shared.config.workers_for(lane);
            info!(lane = %lane, concurrency, "task lane started");
            workers.push(tokio::spawn(lane_loop(
                lane,
                concurrency,
                rx,
                tx.clone(),
                handler,
                shared.clone(),
                shutdown.clone(),
            )));
            senders.insert(lane, tx);
        }

        InProcessTaskQueue {
            senders,
            shared,
            shutdown,
            workers: Mutex::new(workers),
        }
    }
}

/// In-process, at-least-once task queue.
///
/// - One bounded worker pool per lane
/// - Each delivery runs under a lease; a panic or an expired lease counts
///   as a retryable failure
/// - Redelivery after exponential backoff, up to the retry budget
pub struct InProcessTaskQueue {
    senders: HashMap<Lane, mpsc::UnboundedSender<Task>>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for InProcessTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTaskQueue")
            .field("lanes", &self.senders.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl InProcessTaskQueue {
    pub fn stats(&self) -> QueueStats {
        self.shared
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Finished tasks still inside the retention window, oldest first.
    pub fn finished_tasks(&self) -> Vec<TaskRecord> {
        match self.shared.finished.lock() {
            Ok(mut finished) => {
                prune(&mut finished, self.shared.config.retention);
                finished.iter().cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Stop accepting tasks and wait for in-flight deliveries to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let workers = match self.workers.lock() {
            Ok(mut w) => std::mem::take(&mut *w),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            let _ = worker.await;
        }
        info!("task queue stopped");
    }
}

impl TaskQueue for InProcessTaskQueue {
    fn enqueue(&self, lane: Lane, body: &TaskBody) -> Result<TaskId, QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        let sender = self.senders.get(&lane).ok_or(QueueError::UnknownLane(lane))?;
        let bytes = serde_json::to_vec(body).map_err(|e| QueueError::Serialize(e.to_string()))?;
        let task = Task::new(lane, bytes, self.shared.config.retry.max_retry);
        let task_id = task.id;

        sender.send(task).map_err(|_| QueueError::Closed)?;
        debug!(task_id = %task_id, job_id = %body.job_id, lane = %lane, "task enqueued");
        Ok(task_id)
    }
}

async fn lane_loop(
    lane: Lane,
    concurrency: usize,
    mut rx: mpsc::UnboundedReceiver<Task>,
    requeue: mpsc::UnboundedSender<Task>,
    handler: Arc<dyn TaskHandler>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(concurrency));

    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(task) => task,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        tokio::spawn(deliver(
            task,
            handler.clone(),
            shared.clone(),
            requeue.clone(),
            permit,
        ));
    }

    // Wait for in-flight deliveries.
    let _ = permits.acquire_many(concurrency as u32).await;
    debug!(lane = %lane, "task lane stopped");
}

async fn deliver(
    task: Task,
    handler: Arc<dyn TaskHandler>,
    shared: Arc<Shared>,
    requeue: mpsc::UnboundedSender<Task>,
    permit: OwnedSemaphorePermit,
) {
    let lane = task.lane;
    shared.update_stats(|s| *s.running.entry(lane).or_default() += 1);
    debug!(task_id = %task.id, lane = %lane, retried = task.retried, "task delivered");

    let outcome = run_with_lease(&task, &handler, shared.config.lease).await;

    shared.update_stats(|s| {
        if let Some(n) = s.running.get_mut(&lane) {
            *n = n.saturating_sub(1);
        }
        s.processed += 1;
    });

    match outcome {
        TaskOutcome::Done => {
            shared.update_stats(|s| s.succeeded += 1);
            shared.record_finished(&task, TaskState::Completed);
        }
        TaskOutcome::Abandon(reason) => {
            warn!(task_id = %task.id, lane = %lane, reason = %reason, "task abandoned (non-retryable)");
            shared.update_stats(|s| s.abandoned += 1);
            shared.record_finished(&task, TaskState::Abandoned);
        }
        TaskOutcome::Retry(reason) if task.can_retry() => {
            let attempt = task.retried + 1;
            let delay = shared.config.retry.delay_for_attempt(attempt);
            warn!(
                task_id = %task.id,
                lane = %lane,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "task failed; scheduling redelivery"
            );
            shared.update_stats(|s| {
                s.failed += 1;
                s.retried += 1;
            });

            // Backoff does not hold a worker slot.
            drop(permit);
            tokio::time::sleep(delay).await;
            let mut next = task;
            next.retried = attempt;
            if requeue.send(next).is_err() {
                debug!(lane = %lane, "queue closed before redelivery");
            }
        }
        TaskOutcome::Retry(reason) => {
            error!(
                task_id = %task.id,
                lane = %lane,
                retried = task.retried,
                reason = %reason,
                "task failed; retry budget exhausted"
            );
            shared.update_stats(|s| {
                s.failed += 1;
                s.abandoned += 1;
            });
            handler.abandoned(&task, &reason).await;
            shared.record_finished(&task, TaskState::Abandoned);
        }
    }
}

async fn run_with_lease(task: &Task, handler: &Arc<dyn TaskHandler>, lease: Duration) -> TaskOutcome {
    let handler = handler.clone();
    let delivery = task.clone();
    let mut join = tokio::spawn(async move { handler.handle(&delivery).await });

    match tokio::time::timeout(lease, &mut join).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => TaskOutcome::Retry(format!("handler panicked: {e}")),
        Err(_) => {
            join.abort();
            TaskOutcome::Retry("lease expired".to_string())
        }
    }
}
