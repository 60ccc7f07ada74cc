//! End-to-end tests: JobService → TaskQueue → Pipeline → LifecycleEngine + NotificationHub
//!
//! Verifies:
//! - Both job kinds run to completion against placeholder collaborators
//! - Cancellation before dispatch and mid-run leaves exactly one outcome
//! - Collaborator failures are recorded with a sanitised summary
//! - Crashed deliveries are redelivered, then abandoned with the job failed
//! - Duplicate delivery of a finished task changes nothing

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};

    use cadence_core::{Job, JobId, JobKind, JobPayload, JobStatus, MasterPayload, RenderPayload};
    use cadence_events::{EventPublisher, HubConfig, JobEvent, NotificationHub, RENDER_FAILED, Subscription};

    use crate::external::{
        CollaboratorError, GenerateMusicRequest, MusicGenerator, MusicStatus, MusicTask, PLACEHOLDER_CDN,
        PlaceholderMastering, PlaceholderMusicGenerator, PlaceholderStorage, StemSplitStatus, StemSplitTask,
    };
    use crate::jobs::{CancellationRegistry, InMemoryJobRecordStore, JobService, LifecycleEngine};
    use crate::pipeline::{MasterPipeline, PipelineHandler, PollPolicy, RenderPipeline, RenderPollSettings};
    use crate::queue::{
        InProcessTaskQueue, Lane, QueueConfig, RetryPolicy, Task, TaskBody, TaskHandler, TaskOutcome, TaskQueue,
        TaskQueueBuilder, TaskRecord, TaskState,
    };

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug, Clone, Copy)]
    enum Generate {
        Pass,
        Hang,
        Fail,
        Panic,
    }

    /// Placeholder generator with a scripted `generate`.
    struct StubMusic {
        inner: PlaceholderMusicGenerator,
        mode: Generate,
        generate_calls: AtomicU32,
    }

    impl StubMusic {
        fn new(mode: Generate) -> Arc<Self> {
            Arc::new(Self {
                inner: PlaceholderMusicGenerator::new(Duration::ZERO),
                mode,
                generate_calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.generate_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MusicGenerator for StubMusic {
        async fn generate(&self, request: &GenerateMusicRequest) -> Result<MusicTask, CollaboratorError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Generate::Pass => self.inner.generate(request).await,
                Generate::Hang => std::future::pending().await,
                Generate::Fail => Err(CollaboratorError::Status {
                    status: 500,
                    body: "upstream exploded (api_key=sk-secret)".to_string(),
                }),
                Generate::Panic => panic!("generator crashed"),
            }
        }

        async fn music_status(&self, task_id: &str) -> Result<MusicStatus, CollaboratorError> {
            self.inner.music_status(task_id).await
        }

        async fn split_stems(&self, audio_url: &str) -> Result<StemSplitTask, CollaboratorError> {
            self.inner.split_stems(audio_url).await
        }

        async fn stem_split_status(&self, task_id: &str) -> Result<StemSplitStatus, CollaboratorError> {
            self.inner.stem_split_status(task_id).await
        }
    }

    struct Harness {
        service: JobService,
        engine: Arc<LifecycleEngine>,
        hub: NotificationHub,
        queue: Arc<InProcessTaskQueue>,
        registry: CancellationRegistry,
    }

    fn fast_poll() -> RenderPollSettings {
        let policy = PollPolicy::new(Duration::from_millis(5), Duration::from_secs(1));
        RenderPollSettings {
            music: policy,
            stems: policy,
        }
    }

    fn harness(music: Arc<dyn MusicGenerator>, retry: RetryPolicy) -> Harness {
        let engine = LifecycleEngine::arc(InMemoryJobRecordStore::arc());
        let hub = NotificationHub::spawn(HubConfig::default());
        let publisher: Arc<dyn EventPublisher> = Arc::new(hub.clone());
        let registry = CancellationRegistry::new();

        let render = RenderPipeline::new(music, Arc::new(PlaceholderStorage)).with_poll_settings(fast_poll());
        let master = MasterPipeline::new(Arc::new(PlaceholderMastering::new(Duration::ZERO)));

        let queue = Arc::new(
            TaskQueueBuilder::new(QueueConfig::default().with_retry_policy(retry))
                .register(
                    Lane::Render,
                    Arc::new(PipelineHandler::new(render, engine.clone(), publisher.clone(), registry.clone())),
                )
                .register(
                    Lane::Master,
                    Arc::new(PipelineHandler::new(master, engine.clone(), publisher, registry.clone())),
                )
                .start(),
        );
        let service = JobService::new(engine.clone(), queue.clone(), registry.clone());

        Harness {
            service,
            engine,
            hub,
            queue,
            registry,
        }
    }

    fn render_payload() -> RenderPayload {
        serde_json::from_value(json!({
            "projectId": "0190e8a4-7a2e-7c3b-9a51-3f1f8d2b4c10",
            "brief": {
                "genre": "pop",
                "vibes": ["uplifting", "warm"],
                "bpm": {"mode": "fixed", "value": 100},
                "key": {"mode": "manual", "tonic": "F#", "scale": "minor"},
                "structure": [
                    {"id": "s1", "type": "verse", "bars": 16},
                    {"id": "s2", "type": "chorus", "bars": 8}
                ]
            },
            "arrangement": {
                "instruments": ["drums", "bass"],
                "density": "medium",
                "groove": "straight"
            }
        }))
        .unwrap()
    }

    fn master_payload() -> MasterPayload {
        serde_json::from_value(json!({
            "projectId": "0190e8a4-7a2e-7c3b-9a51-3f1f8d2b4c10",
            "profile": "warm",
            "stemUrls": ["https://s/drums.wav", "https://s/bass.wav"],
            "mixSnapshot": {
                "channels": [
                    {"stemId": "drums", "volumeDb": 0.0, "mute": false, "solo": false},
                    {"stemId": "bass", "volumeDb": -6.0, "mute": false, "solo": false}
                ],
                "preset": "default"
            }
        }))
        .unwrap()
    }

    /// Wait for the queue to finish the task of `job_id`.
    async fn finished(queue: &InProcessTaskQueue, job_id: JobId) -> TaskRecord {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(record) = queue
                    .finished_tasks()
                    .into_iter()
                    .find(|r| r.job_id == Some(job_id))
                {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not finish in time")
    }

    /// Receive events up to and including the first terminal one.
    async fn until_terminal(sub: &mut Subscription) -> Vec<JobEvent> {
        tokio::time::timeout(WAIT, async {
            let mut events = Vec::new();
            while let Some(event) = sub.recv().await {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            events
        })
        .await
        .expect("no terminal event in time")
    }

    /// Drain what the hub has already delivered.
    async fn drain(hub: &NotificationHub, sub: &mut Subscription) -> Vec<JobEvent> {
        hub.stats().await.unwrap();
        let mut events = Vec::new();
        while let Ok(event) = sub.try_recv() {
            events.push(event);
        }
        events
    }

    fn progress_values(events: &[JobEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect()
    }

    fn assert_single_outcome(job: &Job) {
        let outcomes = [
            job.status == JobStatus::Succeeded && job.result.is_some(),
            job.status == JobStatus::Failed && job.error.is_some(),
            job.status == JobStatus::Canceled,
        ];
        assert_eq!(outcomes.iter().filter(|o| **o).count(), 1, "job {job:?}");
    }

    #[tokio::test]
    async fn render_job_runs_to_completion_through_the_queue() {
        let h = harness(StubMusic::new(Generate::Pass), RetryPolicy::no_retry());
        let job = h.service.create_job(&render_payload()).unwrap();
        let mut sub = h.hub.attach(job.id).unwrap();

        let events = until_terminal(&mut sub).await;
        assert_eq!(progress_values(&events), vec![5, 10, 30, 60, 75, 90, 95]);
        let Some(JobEvent::Complete { result, .. }) = events.last() else {
            panic!("expected complete, got {events:?}");
        };

        let record = h.engine.get(job.id).unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.progress, 100);
        assert_eq!(record.result.as_ref(), Some(result));
        assert_single_outcome(&record);

        assert_eq!(result["bpm"], 100);
        assert_eq!(result["key"], json!({"tonic": "F#", "scale": "minor"}));
        assert!((result["duration"].as_f64().unwrap() - 57.6).abs() < 1e-9);
        let stems = result["stems"].as_array().unwrap();
        let instruments: Vec<_> = stems.iter().map(|s| s["instrument"].as_str().unwrap()).collect();
        assert_eq!(instruments, vec!["drums", "bass"]);
        for stem in stems {
            assert!(stem["fileUrl"].as_str().unwrap().starts_with(&format!("{PLACEHOLDER_CDN}/stems/")));
            assert_eq!(stem["waveformData"].as_array().unwrap().len(), 100);
        }

        let task = finished(&h.queue, job.id).await;
        assert_eq!(task.state, TaskState::Completed);
        assert!(!h.registry.is_registered(job.id));
    }

    #[tokio::test]
    async fn master_job_runs_to_completion_through_the_queue() {
        let h = harness(StubMusic::new(Generate::Pass), RetryPolicy::no_retry());
        let job = h.service.create_job(&master_payload()).unwrap();
        let mut sub = h.hub.attach(job.id).unwrap();

        let events = until_terminal(&mut sub).await;
        assert_eq!(progress_values(&events), vec![5, 10, 20, 40, 80, 95]);

        let result: JsonValue = h.service.get_job_result(JobKind::Master, job.id).unwrap();
        assert_eq!(events.last(), Some(&JobEvent::complete(job.id, result.clone())));
        assert_eq!(result["profile"], "warm");
        assert_eq!(result["peakDb"], -0.3);
        assert_eq!(result["lufs"], -14);
        assert!(result["fileUrl"].as_str().unwrap().starts_with(&format!("{PLACEHOLDER_CDN}/masters/")));
    }

    #[tokio::test]
    async fn cancel_while_queued_dispatches_nothing() {
        let music = StubMusic::new(Generate::Pass);
        let h = harness(music.clone(), RetryPolicy::no_retry());

        let job = h.service.create_job(&render_payload()).unwrap();
        let mut sub = h.hub.attach(job.id).unwrap();
        let canceled = h.service.cancel_job(JobKind::Render, job.id).unwrap();
        assert_eq!(canceled.status, JobStatus::Canceled);

        let task = finished(&h.queue, job.id).await;
        assert_eq!(task.state, TaskState::Completed);

        let record = h.engine.get(job.id).unwrap();
        assert_eq!(record.status, JobStatus::Canceled);
        assert_eq!(record.progress, 0);
        assert!(record.started_at.is_none());
        assert_eq!(music.calls(), 0);
        assert!(drain(&h.hub, &mut sub).await.is_empty());
    }

    #[tokio::test]
    async fn cancel_mid_run_stops_the_pipeline_without_an_outcome_event() {
        let music = StubMusic::new(Generate::Hang);
        let h = harness(music.clone(), RetryPolicy::no_retry());

        let job = h.service.create_job(&render_payload()).unwrap();
        let mut sub = h.hub.attach(job.id).unwrap();

        // Wait until the pipeline is blocked on the generator.
        tokio::time::timeout(WAIT, async {
            while let Some(event) = sub.recv().await {
                if matches!(event, JobEvent::Progress { progress: 10, .. }) {
                    break;
                }
            }
        })
        .await
        .unwrap();

        h.service.cancel_job(JobKind::Render, job.id).unwrap();
        let task = finished(&h.queue, job.id).await;
        assert_eq!(task.state, TaskState::Completed);

        let record = h.engine.get(job.id).unwrap();
        assert_eq!(record.status, JobStatus::Canceled);
        assert_eq!(record.progress, 10);
        assert!(record.result.is_none());
        assert_single_outcome(&record);
        assert_eq!(music.calls(), 1);
        assert!(!h.registry.is_registered(job.id));
        assert!(drain(&h.hub, &mut sub).await.is_empty());
    }

    #[tokio::test]
    async fn collaborator_failure_is_recorded_with_a_sanitised_summary() {
        let music = StubMusic::new(Generate::Fail);
        let h = harness(music.clone(), RetryPolicy::fixed(3, Duration::from_millis(1)));

        let job = h.service.create_job(&render_payload()).unwrap();
        let mut sub = h.hub.attach(job.id).unwrap();

        let events = until_terminal(&mut sub).await;
        assert_eq!(
            events.last(),
            Some(&JobEvent::error(job.id, RENDER_FAILED, "Music generation failed"))
        );

        let record = h.engine.get(job.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Music generation failed"));
        assert_single_outcome(&record);

        finished(&h.queue, job.id).await;
        assert_eq!(music.calls(), 1);
        assert_eq!(h.queue.stats().retried, 0);
    }

    #[tokio::test]
    async fn crashed_deliveries_are_retried_then_abandoned() {
        let music = StubMusic::new(Generate::Panic);
        let h = harness(music.clone(), RetryPolicy::fixed(2, Duration::from_millis(1)));

        let job = h.service.create_job(&render_payload()).unwrap();
        let task = finished(&h.queue, job.id).await;
        assert_eq!(task.state, TaskState::Abandoned);
        assert_eq!(task.retried, 2);

        let record = h.engine.get(job.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Render failed"));
        assert_eq!(record.retry_count, 2);
        assert_eq!(music.calls(), 3);

        let stats = h.queue.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.abandoned, 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_abandoned_without_retry() {
        let h = harness(StubMusic::new(Generate::Pass), RetryPolicy::fixed(3, Duration::from_millis(1)));

        let payload = json!({"projectId": "not-a-project"});
        let job = h.engine.create(JobKind::Render, payload.clone()).unwrap();
        h.queue
            .enqueue(Lane::Render, &TaskBody { job_id: job.id, payload })
            .unwrap();

        let task = finished(&h.queue, job.id).await;
        assert_eq!(task.state, TaskState::Abandoned);
        assert_eq!(task.retried, 0);

        let record = h.engine.get(job.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Invalid payload"));
        assert_eq!(h.queue.stats().retried, 0);
    }

    #[tokio::test]
    async fn duplicate_delivery_of_a_finished_task_changes_nothing() {
        let engine = LifecycleEngine::arc(InMemoryJobRecordStore::arc());
        let hub = NotificationHub::spawn(HubConfig::default());
        let handler = PipelineHandler::new(
            MasterPipeline::new(Arc::new(PlaceholderMastering::new(Duration::ZERO))),
            engine.clone(),
            Arc::new(hub.clone()),
            CancellationRegistry::new(),
        );

        let payload = serde_json::to_value(master_payload()).unwrap();
        let job = engine.create(MasterPayload::KIND, payload.clone()).unwrap();
        let body = serde_json::to_vec(&TaskBody {
            job_id: job.id,
            payload,
        })
        .unwrap();
        let mut task = Task::new(Lane::Master, body, 3);
        let mut sub = hub.attach(job.id).unwrap();

        assert_eq!(handler.handle(&task).await, TaskOutcome::Done);
        let first = engine.get(job.id).unwrap();
        assert_eq!(first.status, JobStatus::Succeeded);

        task.retried = 1;
        assert_eq!(handler.handle(&task).await, TaskOutcome::Done);
        let second = engine.get(job.id).unwrap();
        assert_eq!(second.result, first.result);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(second.retry_count, 0);

        let events = drain(&hub, &mut sub).await;
        let completes = events
            .iter()
            .filter(|e| matches!(e, JobEvent::Complete { .. }))
            .count();
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn render_and_master_jobs_share_nothing_but_the_queue() {
        let h = harness(StubMusic::new(Generate::Pass), RetryPolicy::no_retry());
        let render = h.service.create_job(&render_payload()).unwrap();
        let master = h.service.create_job(&master_payload()).unwrap();
        let mut render_sub = h.hub.attach(render.id).unwrap();
        let mut master_sub = h.hub.attach(master.id).unwrap();

        let render_events = until_terminal(&mut render_sub).await;
        let master_events = until_terminal(&mut master_sub).await;
        assert!(render_events.iter().all(|e| e.job_id() == render.id));
        assert!(master_events.iter().all(|e| e.job_id() == master.id));

        assert_eq!(finished(&h.queue, render.id).await.lane, Lane::Render);
        assert_eq!(finished(&h.queue, master.id).await.lane, Lane::Master);
    }
}
