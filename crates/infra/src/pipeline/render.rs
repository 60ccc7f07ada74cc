//! Render: brief → generated track → separated stems.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;

use cadence_core::payload::render::WAVEFORM_POINTS;
use cadence_core::payload::{RenderPayload, RenderResult, StemResult, placeholder_waveform};
use cadence_events::RENDER_FAILED;

use crate::external::{CollaboratorError, GenerateMusicRequest, MusicGenerator, ObjectStorage, TrackOutline};

use super::{JobRun, Pipeline, PipelineError, PollPolicy, PollStatus};

const MUSIC_FAILED: &str = "Music generation failed";
const MUSIC_TIMED_OUT: &str = "Music generation timed out";
const STEMS_FAILED: &str = "Stem splitting failed";
const STEMS_TIMED_OUT: &str = "Stem splitting timed out";
const UPLOAD_FAILED: &str = "Stem upload failed";

#[derive(Debug, Clone, Copy)]
pub struct RenderPollSettings {
    pub music: PollPolicy,
    pub stems: PollPolicy,
}

impl Default for RenderPollSettings {
    fn default() -> Self {
        Self {
            music: PollPolicy::new(Duration::from_secs(5), Duration::from_secs(10 * 60)),
            stems: PollPolicy::new(Duration::from_secs(5), Duration::from_secs(5 * 60)),
        }
    }
}

pub struct RenderPipeline {
    music: Arc<dyn MusicGenerator>,
    storage: Arc<dyn ObjectStorage>,
    poll: RenderPollSettings,
}

impl RenderPipeline {
    pub fn new(music: Arc<dyn MusicGenerator>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            music,
            storage,
            poll: RenderPollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: RenderPollSettings) -> Self {
        self.poll = poll;
        self
    }
}

#[async_trait]
impl Pipeline for RenderPipeline {
    type Payload = RenderPayload;

    const ERROR_CODE: &'static str = RENDER_FAILED;
    const ABANDONED_SUMMARY: &'static str = "Render failed";

    async fn run(&self, run: &JobRun, payload: RenderPayload) -> Result<JsonValue, PipelineError> {
        run.step(5, "Building music prompt")?;
        let request = GenerateMusicRequest {
            prompt: payload.music_prompt(),
            style: payload.brief.genre.as_str().to_string(),
            make_instrumental: true,
            outline: TrackOutline {
                project_id: payload.project_id,
                instruments: payload
                    .arrangement
                    .instruments
                    .iter()
                    .map(|i| i.as_str().to_string())
                    .collect(),
                duration_secs: payload.structure_duration_secs(),
            },
        };

        run.step(10, "Generating music")?;
        let generation = run.call(MUSIC_FAILED, self.music.generate(&request)).await?;

        run.step(30, "Waiting for music generation")?;
        let music = {
            let generator = &self.music;
            let task_id = generation.task_id.as_str();
            run.poll(MUSIC_FAILED, MUSIC_TIMED_OUT, self.poll.music, move || async move {
                let status = generator.music_status(task_id).await?;
                let state = status.state();
                let text = status.status.clone();
                Ok::<_, CollaboratorError>(PollStatus::from_state(state, status, &text))
            })
            .await?
        };

        run.step(60, "Splitting stems")?;
        let split = run.call(STEMS_FAILED, self.music.split_stems(&music.audio_url)).await?;

        run.step(75, "Waiting for stem separation")?;
        let separated = {
            let generator = &self.music;
            let task_id = split.task_id.as_str();
            run.poll(STEMS_FAILED, STEMS_TIMED_OUT, self.poll.stems, move || async move {
                let status = generator.stem_split_status(task_id).await?;
                let state = status.state();
                let text = status.status.clone();
                Ok::<_, CollaboratorError>(PollStatus::from_state(state, status, &text))
            })
            .await?
        };

        run.step(90, "Uploading stems")?;
        let mut stems = Vec::with_capacity(separated.stems.len());
        for stem in &separated.stems {
            let stem_id = uuid::Uuid::now_v7().to_string();
            let key = format!("stems/{}/{stem_id}.wav", payload.project_id);
            let file_url = run.call(UPLOAD_FAILED, self.storage.publish(&key, &stem.url)).await?;
            stems.push(StemResult {
                id: stem_id,
                instrument: stem.name.clone(),
                file_url,
                duration: stem.duration,
                waveform_data: placeholder_waveform(WAVEFORM_POINTS),
            });
        }

        run.step(95, "Finalizing")?;
        let result = RenderResult {
            id: uuid::Uuid::now_v7().to_string(),
            bpm: payload.effective_bpm(),
            duration: music.duration,
            key: payload.effective_key(),
            created_at: Utc::now(),
            stems,
        };
        Ok(serde_json::to_value(result)?)
    }
}
