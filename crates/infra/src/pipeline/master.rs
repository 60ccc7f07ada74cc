//! Master: stems + mix snapshot → mastered track.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;

use cadence_core::RECORD_TTL;
use cadence_core::payload::{MasterPayload, MasterResult};
use cadence_events::MASTER_FAILED;

use crate::external::{AudioMastering, MasterRequest, MixSetting, VocalTakeInput};

use super::{JobRun, Pipeline, PipelineError};

const MASTERING_FAILED: &str = "Mastering failed";

pub struct MasterPipeline {
    mastering: Arc<dyn AudioMastering>,
}

impl MasterPipeline {
    pub fn new(mastering: Arc<dyn AudioMastering>) -> Self {
        Self { mastering }
    }
}

/// Pair each channel with the stem at the same position.
///
/// Extra channels or stems on either side are dropped.
fn mix_settings(payload: &MasterPayload) -> Vec<MixSetting> {
    payload
        .mix_snapshot
        .channels
        .iter()
        .zip(&payload.stem_urls)
        .map(|(channel, stem_url)| MixSetting {
            stem_url: stem_url.clone(),
            volume: channel.linear_volume(),
            mute: channel.mute,
            solo: channel.solo,
        })
        .collect()
}

fn vocal_takes(payload: &MasterPayload) -> Vec<VocalTakeInput> {
    payload
        .vocal_takes
        .iter()
        .map(|take| VocalTakeInput {
            url: take.file_url.clone(),
            volume: 1.0,
        })
        .collect()
}

#[async_trait]
impl Pipeline for MasterPipeline {
    type Payload = MasterPayload;

    const ERROR_CODE: &'static str = MASTER_FAILED;
    const ABANDONED_SUMMARY: &'static str = MASTERING_FAILED;

    async fn run(&self, run: &JobRun, payload: MasterPayload) -> Result<JsonValue, PipelineError> {
        run.step(5, "Preparing stems")?;

        run.step(10, "Building mix settings")?;
        let request = MasterRequest {
            stem_urls: payload.stem_urls.clone(),
            mix_settings: mix_settings(&payload),
            profile: payload.profile.as_str().to_string(),
            vocal_takes: vocal_takes(&payload),
            output_key: format!("masters/{}/{}.wav", payload.project_id, uuid::Uuid::now_v7()),
        };

        run.step(20, "Starting mastering process")?;

        run.step(40, "Applying EQ and compression")?;
        let mastered = run.call(MASTERING_FAILED, self.mastering.master(&request)).await?;

        run.step(80, "Applying limiter")?;
        run.step(95, "Finalizing")?;

        let result = MasterResult {
            file_url: mastered.output_url,
            duration: mastered.duration,
            profile: payload.profile,
            peak_db: mastered.peak_db,
            lufs: whole_lufs(mastered.lufs),
            expires_at: Utc::now() + RECORD_TTL,
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Loudness is reported in whole units, truncated toward zero.
fn whole_lufs(lufs: f64) -> i32 {
    lufs.trunc() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> MasterPayload {
        serde_json::from_value(serde_json::json!({
            "projectId": "0190e8a4-7a2e-7c3b-9a51-3f1f8d2b4c10",
            "profile": "warm",
            "stemUrls": ["https://s/drums.wav", "https://s/bass.wav"],
            "mixSnapshot": {
                "channels": [
                    {"stemId": "drums", "volumeDb": 0.0, "mute": false, "solo": false},
                    {"stemId": "bass", "volumeDb": -60.0, "mute": true, "solo": false},
                    {"stemId": "extra", "volumeDb": 6.0, "mute": false, "solo": false}
                ],
                "preset": "default"
            },
            "vocalTakes": [
                {"sectionId": "verse", "takeId": "t1", "fileUrl": "https://v/t1.wav"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn channels_pair_with_stems_by_position() {
        let settings = mix_settings(&payload());
        assert_eq!(
            settings,
            vec![
                MixSetting {
                    stem_url: "https://s/drums.wav".into(),
                    volume: 1.0,
                    mute: false,
                    solo: false,
                },
                MixSetting {
                    stem_url: "https://s/bass.wav".into(),
                    volume: 0.0,
                    mute: true,
                    solo: false,
                },
            ]
        );
    }

    #[test]
    fn vocal_takes_default_to_unity_gain() {
        assert_eq!(
            vocal_takes(&payload()),
            vec![VocalTakeInput {
                url: "https://v/t1.wav".into(),
                volume: 1.0
            }]
        );
    }

    #[test]
    fn loudness_truncates_toward_zero() {
        assert_eq!(whole_lufs(-14.0), -14);
        assert_eq!(whole_lufs(-9.7), -9);
        assert_eq!(whole_lufs(0.4), 0);
    }
}
