//! Mastering through the audio microservice.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::JsonHttp;
use super::{CollaboratorError, PLACEHOLDER_CDN};

/// Mix settings for one stem, volume already linear.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixSetting {
    pub stem_url: String,
    pub volume: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mute: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub solo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VocalTakeInput {
    pub url: String,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterRequest {
    pub stem_urls: Vec<String>,
    pub mix_settings: Vec<MixSetting>,
    pub profile: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vocal_takes: Vec<VocalTakeInput>,
    pub output_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterResponse {
    pub output_url: String,
    pub duration: f64,
    pub peak_db: f64,
    pub lufs: f64,
}

#[async_trait]
pub trait AudioMastering: Send + Sync {
    /// Mix and master the stems; blocks until the output is written.
    async fn master(&self, request: &MasterRequest) -> Result<MasterResponse, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct AudioServiceClient {
    http: JsonHttp,
}

impl AudioServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: JsonHttp::new("audio-service", base_url, timeout),
        }
    }
}

#[async_trait]
impl AudioMastering for AudioServiceClient {
    async fn master(&self, request: &MasterRequest) -> Result<MasterResponse, CollaboratorError> {
        self.http.post("/master", request).await
    }
}

/// Stand-in mastering with fixed loudness figures.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderMastering {
    step_delay: Duration,
}

impl PlaceholderMastering {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

#[async_trait]
impl AudioMastering for PlaceholderMastering {
    async fn master(&self, _request: &MasterRequest) -> Result<MasterResponse, CollaboratorError> {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        Ok(MasterResponse {
            output_url: format!("{PLACEHOLDER_CDN}/masters/{}.wav", uuid::Uuid::now_v7()),
            duration: 180.5,
            peak_db: -0.3,
            lufs: -14.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let request = MasterRequest {
            stem_urls: vec!["https://s/a.wav".into()],
            mix_settings: vec![MixSetting {
                stem_url: "https://s/a.wav".into(),
                volume: 1.0,
                mute: false,
                solo: true,
            }],
            profile: "warm".into(),
            vocal_takes: vec![],
            output_key: "masters/p/x.wav".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "stem_urls": ["https://s/a.wav"],
                "mix_settings": [{"stem_url": "https://s/a.wav", "volume": 1.0, "solo": true}],
                "profile": "warm",
                "output_key": "masters/p/x.wav"
            })
        );
    }

    #[tokio::test]
    async fn placeholder_returns_fixed_figures() {
        let request = MasterRequest {
            stem_urls: vec![],
            mix_settings: vec![],
            profile: "clean".into(),
            vocal_takes: vec![],
            output_key: "k".into(),
        };
        let response = PlaceholderMastering::default().master(&request).await.unwrap();
        assert!(response.output_url.starts_with("https://cdn.makeasinger.com/masters/"));
        assert_eq!(response.duration, 180.5);
        assert_eq!(response.peak_db, -0.3);
        assert_eq!(response.lufs, -14.0);
    }
}
