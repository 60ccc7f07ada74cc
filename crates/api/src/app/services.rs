//! Runtime wiring: record store, lifecycle engine, hub, task queue, pipelines.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use cadence_events::{EventPublisher, HubConfig, NotificationHub};
use cadence_infra::config::AppConfig;
use cadence_infra::external::Collaborators;
use cadence_infra::jobs::{
    CancellationRegistry, InMemoryJobRecordStore, JobRecordStore, JobService, LifecycleEngine, StoreError,
};
use cadence_infra::pipeline::{MasterPipeline, PipelineHandler, RenderPipeline};
use cadence_infra::queue::{InProcessTaskQueue, Lane, TaskQueueBuilder};

/// How often expired job records are swept from the store.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Everything the HTTP handlers reach.
pub struct AppServices {
    pub jobs: JobService,
    pub engine: Arc<LifecycleEngine>,
    pub hub: NotificationHub,
    pub queue: Arc<InProcessTaskQueue>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices").finish_non_exhaustive()
    }
}

impl AppServices {
    /// Build the services described by `config`. Must run inside a tokio runtime.
    pub fn build(config: &AppConfig) -> Result<Self, StoreError> {
        let store = record_store(config)?;
        Ok(Self::with_store(config, store, Collaborators::from_config(config)))
    }

    /// Build around an explicit store and collaborator set.
    pub fn with_store(
        config: &AppConfig,
        store: Arc<dyn JobRecordStore>,
        collaborators: Collaborators,
    ) -> Self {
        let engine = LifecycleEngine::arc(store);
        let hub = NotificationHub::spawn(HubConfig::default());
        let publisher: Arc<dyn EventPublisher> = Arc::new(hub.clone());
        let cancellations = CancellationRegistry::new();

        let render = PipelineHandler::new(
            RenderPipeline::new(collaborators.music, collaborators.storage),
            engine.clone(),
            publisher.clone(),
            cancellations.clone(),
        );
        let master = PipelineHandler::new(
            MasterPipeline::new(collaborators.mastering),
            engine.clone(),
            publisher,
            cancellations.clone(),
        );

        let queue = Arc::new(
            TaskQueueBuilder::new(config.queue.queue_config())
                .register(Lane::Render, Arc::new(render))
                .register(Lane::Master, Arc::new(master))
                .start(),
        );

        let jobs = JobService::new(engine.clone(), queue.clone(), cancellations);
        Self {
            jobs,
            engine,
            hub,
            queue,
        }
    }

    /// Periodically drop expired job records.
    pub fn spawn_record_purge(&self, every: Duration) -> JoinHandle<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = engine.purge_expired() {
                    tracing::warn!(error = %e, "record purge failed");
                }
            }
        })
    }

    /// Stop accepting tasks and wait for in-flight pipelines.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

#[cfg(feature = "redis")]
fn record_store(config: &AppConfig) -> Result<Arc<dyn JobRecordStore>, StoreError> {
    match &config.redis_url {
        Some(url) => {
            tracing::info!("job records: redis");
            Ok(Arc::new(cadence_infra::jobs::RedisJobRecordStore::new(url)?))
        }
        None => {
            tracing::info!("job records: in-memory");
            Ok(InMemoryJobRecordStore::arc())
        }
    }
}

#[cfg(not(feature = "redis"))]
fn record_store(config: &AppConfig) -> Result<Arc<dyn JobRecordStore>, StoreError> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but redis support is not compiled in; using in-memory records");
    } else {
        tracing::info!("job records: in-memory");
    }
    Ok(InMemoryJobRecordStore::arc())
}
