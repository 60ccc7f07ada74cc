//! The notification hub: per-job fan-out of [`JobEvent`]s.
//!
//! ## Structure
//!
//! A single actor task owns the registry `JobId -> {SubscriberId -> Sender}`.
//! Every mutation (attach, detach, publish) reaches it as a [`Command`] over
//! one unbounded channel, so there is exactly one mutator and no lock around
//! the registry.
//!
//! ## Delivery
//!
//! - **Non-blocking publish**: `publish` only enqueues a command; fan-out
//!   happens on the actor.
//! - **No replay**: events for a job without subscribers are dropped.
//!   Late subscribers backfill from the job record.
//! - **Slow consumers**: each subscriber has a bounded buffer. A full buffer
//!   detaches that subscriber (its receiver then sees end-of-stream). Other
//!   subscribers and the publisher are unaffected.
//! - **Ordering**: events reach one subscriber in publish order.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use cadence_core::{JobId, SubscriberId};

use crate::event::JobEvent;
use crate::publisher::EventPublisher;

/// Per-subscriber outbound buffer size.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The hub actor has stopped.
    #[error("notification hub is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

impl HubConfig {
    /// Buffer size per subscriber; at least one event.
    pub fn with_subscriber_buffer(mut self, size: usize) -> Self {
        self.subscriber_buffer = size.max(1);
        self
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer.max(1)
    }
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub jobs: usize,
    pub subscribers: usize,
    pub published: u64,
    pub dropped_without_subscribers: u64,
    pub slow_consumers_detached: u64,
}

enum Command {
    Attach {
        job_id: JobId,
        subscriber_id: SubscriberId,
        tx: mpsc::Sender<JobEvent>,
    },
    Detach {
        job_id: JobId,
        subscriber_id: SubscriberId,
    },
    Publish(JobEvent),
    SubscriberCount {
        job_id: JobId,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle to the hub actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    commands: mpsc::UnboundedSender<Command>,
    config: HubConfig,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Attach { job_id, .. } => write!(f, "Attach({job_id})"),
            Command::Detach { job_id, .. } => write!(f, "Detach({job_id})"),
            Command::Publish(e) => write!(f, "Publish({})", e.job_id()),
            Command::SubscriberCount { job_id, .. } => write!(f, "SubscriberCount({job_id})"),
            Command::Stats { .. } => f.write_str("Stats"),
        }
    }
}

impl NotificationHub {
    /// Spawn the hub actor on the current tokio runtime.
    ///
    /// The actor stops once every handle and subscription is dropped.
    pub fn spawn(config: HubConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { commands, config }
    }

    /// Attach a new subscriber to `job_id`.
    ///
    /// Events published after this call returns are delivered to it.
    pub fn attach(&self, job_id: JobId) -> Result<Subscription, HubError> {
        let subscriber_id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer());
        self.send(Command::Attach {
            job_id,
            subscriber_id,
            tx,
        })?;
        Ok(Subscription {
            id: subscriber_id,
            job_id,
            rx,
            commands: self.commands.clone(),
        })
    }

    /// Remove a subscriber. Idempotent.
    pub fn detach(&self, job_id: JobId, subscriber_id: SubscriberId) -> Result<(), HubError> {
        self.send(Command::Detach {
            job_id,
            subscriber_id,
        })
    }

    /// Enqueue an event for fan-out to the job's subscribers.
    pub fn publish(&self, event: JobEvent) -> Result<(), HubError> {
        self.send(Command::Publish(event))
    }

    /// Number of subscribers currently attached to `job_id`.
    ///
    /// Answered after every previously enqueued command has been applied.
    pub async fn subscriber_count(&self, job_id: JobId) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SubscriberCount { job_id, reply })?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| HubError::Closed)
    }

    fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).map_err(|_| HubError::Closed)
    }
}

impl EventPublisher for NotificationHub {
    fn publish(&self, event: JobEvent) -> Result<(), HubError> {
        NotificationHub::publish(self, event)
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, HashMap<SubscriberId, mpsc::Sender<JobEvent>>>,
    stats: HubStats,
}

impl Registry {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Attach {
                job_id,
                subscriber_id,
                tx,
            } => {
                self.jobs.entry(job_id).or_default().insert(subscriber_id, tx);
                tracing::debug!(job_id = %job_id, subscriber_id = %subscriber_id, "subscriber attached");
            }
            Command::Detach {
                job_id,
                subscriber_id,
            } => {
                if let Some(subs) = self.jobs.get_mut(&job_id) {
                    if subs.remove(&subscriber_id).is_some() {
                        tracing::debug!(job_id = %job_id, subscriber_id = %subscriber_id, "subscriber detached");
                    }
                    if subs.is_empty() {
                        self.jobs.remove(&job_id);
                    }
                }
            }
            Command::Publish(event) => self.fan_out(event),
            Command::SubscriberCount { job_id, reply } => {
                let n = self.jobs.get(&job_id).map_or(0, HashMap::len);
                let _ = reply.send(n);
            }
            Command::Stats { reply } => {
                let mut stats = self.stats;
                stats.jobs = self.jobs.len();
                stats.subscribers = self.jobs.values().map(HashMap::len).sum();
                let _ = reply.send(stats);
            }
        }
    }

    fn fan_out(&mut self, event: JobEvent) {
        let job_id = event.job_id();
        let Some(subs) = self.jobs.get_mut(&job_id) else {
            self.stats.dropped_without_subscribers += 1;
            return;
        };
        self.stats.published += 1;

        let mut slow = 0u64;
        subs.retain(|subscriber_id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    job_id = %job_id,
                    subscriber_id = %subscriber_id,
                    "subscriber buffer full; detaching slow consumer"
                );
                slow += 1;
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        self.stats.slow_consumers_detached += slow;

        if subs.is_empty() {
            self.jobs.remove(&job_id);
        }
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut registry = Registry::default();
    while let Some(command) = rx.recv().await {
        registry.apply(command);
    }
    tracing::debug!("notification hub stopped");
}

/// A live attachment to one job's event stream.
///
/// Dropping the subscription detaches it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    job_id: JobId,
    rx: mpsc::Receiver<JobEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, or `None` once the hub detached this subscriber
    /// (slow consumer) and the buffer is drained.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<JobEvent, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Detach {
            job_id: self.job_id,
            subscriber_id: self.id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::JobStatus;
    use tokio::sync::mpsc::error::TryRecvError;

    fn progress(job_id: JobId, p: u8) -> JobEvent {
        JobEvent::progress(job_id, p, JobStatus::Running, format!("step {p}"))
    }

    /// Wait until the actor has processed everything sent so far.
    async fn flush(hub: &NotificationHub) {
        hub.stats().await.unwrap();
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_publish_order() {
        let hub = NotificationHub::spawn(HubConfig::default());
        let job = JobId::new();
        let mut sub = hub.attach(job).unwrap();

        for p in [10, 40, 90] {
            hub.publish(progress(job, p)).unwrap();
        }
        hub.publish(JobEvent::complete(job, serde_json::json!({"r": 1}))).unwrap();

        for p in [10, 40, 90] {
            assert_eq!(sub.recv().await, Some(progress(job, p)));
        }
        assert!(matches!(sub.recv().await, Some(JobEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn events_without_subscribers_are_dropped() {
        let hub = NotificationHub::spawn(HubConfig::default());
        let job = JobId::new();
        hub.publish(progress(job, 10)).unwrap();

        let mut late = hub.attach(job).unwrap();
        flush(&hub).await;
        assert_eq!(late.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(hub.stats().await.unwrap().dropped_without_subscribers, 1);
    }

    #[tokio::test]
    async fn detached_subscriber_stops_receiving() {
        let hub = NotificationHub::spawn(HubConfig::default());
        let job = JobId::new();
        let mut s1 = hub.attach(job).unwrap();
        let mut s2 = hub.attach(job).unwrap();

        hub.publish(progress(job, 10)).unwrap();
        hub.detach(job, s1.id()).unwrap();
        hub.publish(JobEvent::complete(job, serde_json::json!("R"))).unwrap();

        assert_eq!(s1.recv().await, Some(progress(job, 10)));
        assert_eq!(s1.recv().await, None);

        assert_eq!(s2.recv().await, Some(progress(job, 10)));
        assert_eq!(s2.recv().await, Some(JobEvent::complete(job, serde_json::json!("R"))));
    }

    #[tokio::test]
    async fn detach_is_idempotent_and_prunes_empty_jobs() {
        let hub = NotificationHub::spawn(HubConfig::default());
        let job = JobId::new();
        let sub = hub.attach(job).unwrap();
        assert_eq!(hub.subscriber_count(job).await.unwrap(), 1);

        hub.detach(job, sub.id()).unwrap();
        hub.detach(job, sub.id()).unwrap();
        drop(sub);

        assert_eq!(hub.subscriber_count(job).await.unwrap(), 0);
        assert_eq!(hub.stats().await.unwrap().jobs, 0);
    }

    #[tokio::test]
    async fn dropping_a_subscription_detaches_it() {
        let hub = NotificationHub::spawn(HubConfig::default());
        let job = JobId::new();
        let a = hub.attach(job).unwrap();
        let _b = hub.attach(job).unwrap();
        drop(a);
        assert_eq!(hub.subscriber_count(job).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn slow_consumer_is_detached_without_affecting_others() {
        let hub = NotificationHub::spawn(HubConfig::default().with_subscriber_buffer(2));
        let job_a = JobId::new();
        let job_b = JobId::new();

        let mut slow = hub.attach(job_a).unwrap();
        let mut fast = hub.attach(job_a).unwrap();
        let mut other = hub.attach(job_b).unwrap();

        let mut fast_seen = Vec::new();
        let mut other_seen = Vec::new();
        for p in 1..=5u8 {
            hub.publish(progress(job_a, p)).unwrap();
            hub.publish(progress(job_b, p)).unwrap();
            flush(&hub).await;
            while let Ok(e) = fast.try_recv() {
                fast_seen.push(e);
            }
            while let Ok(e) = other.try_recv() {
                other_seen.push(e);
            }
        }

        assert_eq!(fast_seen, (1..=5).map(|p| progress(job_a, p)).collect::<Vec<_>>());
        assert_eq!(other_seen, (1..=5).map(|p| progress(job_b, p)).collect::<Vec<_>>());

        // The slow subscriber kept what fit, then its stream ended.
        assert_eq!(slow.recv().await, Some(progress(job_a, 1)));
        assert_eq!(slow.recv().await, Some(progress(job_a, 2)));
        assert_eq!(slow.recv().await, None);

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.slow_consumers_detached, 1);
        assert_eq!(hub.subscriber_count(job_a).await.unwrap(), 1);
        assert_eq!(hub.subscriber_count(job_b).await.unwrap(), 1);

        hub.publish(progress(job_b, 6)).unwrap();
        assert_eq!(other.recv().await, Some(progress(job_b, 6)));
    }

    #[tokio::test]
    async fn zero_sized_buffer_still_holds_one_event() {
        for config in [
            HubConfig::default().with_subscriber_buffer(0),
            HubConfig { subscriber_buffer: 0 },
        ] {
            assert_eq!(config.subscriber_buffer(), 1);
            let hub = NotificationHub::spawn(config);
            let job = JobId::new();
            let mut sub = hub.attach(job).unwrap();

            hub.publish(progress(job, 10)).unwrap();
            assert_eq!(sub.recv().await, Some(progress(job, 10)));
        }
    }
}
