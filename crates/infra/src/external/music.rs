//! Music generation and stem separation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cadence_core::ProjectId;

use super::http::JsonHttp;
use super::{CollaboratorError, PLACEHOLDER_CDN};

const SUNO_TIMEOUT: Duration = Duration::from_secs(120);

/// State of a remote asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Pending,
    Succeeded,
    Failed,
}

impl RemoteState {
    pub fn from_wire(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "completed" | "success" => Self::Succeeded,
            "failed" | "error" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// What the requested track should look like. Not sent over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackOutline {
    pub project_id: ProjectId,
    pub instruments: Vec<String>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateMusicRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub style: String,
    pub make_instrumental: bool,
    #[serde(skip)]
    pub outline: TrackOutline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MusicTask {
    pub task_id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MusicStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub audio_url: String,
    #[serde(default)]
    pub duration: f64,
    pub status: String,
}

impl MusicStatus {
    pub fn state(&self) -> RemoteState {
        RemoteState::from_wire(&self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StemSplitTask {
    pub task_id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStem {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StemSplitStatus {
    #[serde(default)]
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub stems: Vec<RemoteStem>,
}

impl StemSplitStatus {
    pub fn state(&self) -> RemoteState {
        RemoteState::from_wire(&self.status)
    }
}

/// Generates an instrumental track and splits it into stems.
///
/// Both operations are asynchronous on the remote side: the start call
/// returns a task id that is polled for status.
#[async_trait]
pub trait MusicGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateMusicRequest) -> Result<MusicTask, CollaboratorError>;

    async fn music_status(&self, task_id: &str) -> Result<MusicStatus, CollaboratorError>;

    async fn split_stems(&self, audio_url: &str) -> Result<StemSplitTask, CollaboratorError>;

    async fn stem_split_status(&self, task_id: &str) -> Result<StemSplitStatus, CollaboratorError>;
}

#[derive(Serialize)]
struct SplitStemsRequest<'a> {
    audio_url: &'a str,
}

/// HTTP client for the Suno-compatible generation API.
#[derive(Debug, Clone)]
pub struct SunoClient {
    http: JsonHttp,
}

impl SunoClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: JsonHttp::new("suno", base_url, SUNO_TIMEOUT).with_bearer(api_key),
        }
    }
}

#[async_trait]
impl MusicGenerator for SunoClient {
    async fn generate(&self, request: &GenerateMusicRequest) -> Result<MusicTask, CollaboratorError> {
        self.http.post("/v1/music/generate", request).await
    }

    async fn music_status(&self, task_id: &str) -> Result<MusicStatus, CollaboratorError> {
        self.http.get(&format!("/v1/music/status/{task_id}")).await
    }

    async fn split_stems(&self, audio_url: &str) -> Result<StemSplitTask, CollaboratorError> {
        self.http
            .post("/v1/audio/split-stems", &SplitStemsRequest { audio_url })
            .await
    }

    async fn stem_split_status(&self, task_id: &str) -> Result<StemSplitStatus, CollaboratorError> {
        self.http.get(&format!("/v1/audio/split-stems/{task_id}")).await
    }
}

/// Stand-in generator: every operation completes on its first status check.
///
/// Output follows the requested [`TrackOutline`]: one stem per instrument,
/// all with the outlined duration. The outline travels inside the task id,
/// so the generator keeps no per-task state and an abandoned run leaves
/// nothing behind.
#[derive(Debug, Default)]
pub struct PlaceholderMusicGenerator {
    step_delay: Duration,
}

impl PlaceholderMusicGenerator {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    async fn simulate_latency(&self) {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
    }

    fn task_id(outline: &TrackOutline) -> Result<String, CollaboratorError> {
        let json = serde_json::to_vec(outline).map_err(|e| CollaboratorError::Decode(e.to_string()))?;
        Ok(json.iter().map(|b| format!("{b:02x}")).collect())
    }

    fn track(task_id: &str) -> Result<TrackOutline, CollaboratorError> {
        let unknown = || CollaboratorError::Remote(format!("unknown task {task_id}"));
        if task_id.len() % 2 != 0 {
            return Err(unknown());
        }
        let bytes = (0..task_id.len())
            .step_by(2)
            .map(|i| {
                task_id
                    .get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(unknown)?;
        serde_json::from_slice(&bytes).map_err(|_| unknown())
    }

    fn audio_url(task_id: &str) -> String {
        format!("{PLACEHOLDER_CDN}/renders/{task_id}.wav")
    }
}

#[async_trait]
impl MusicGenerator for PlaceholderMusicGenerator {
    async fn generate(&self, request: &GenerateMusicRequest) -> Result<MusicTask, CollaboratorError> {
        self.simulate_latency().await;
        Ok(MusicTask {
            task_id: Self::task_id(&request.outline)?,
            status: "pending".to_string(),
        })
    }

    async fn music_status(&self, task_id: &str) -> Result<MusicStatus, CollaboratorError> {
        self.simulate_latency().await;
        let track = Self::track(task_id)?;
        Ok(MusicStatus {
            id: task_id.to_string(),
            audio_url: Self::audio_url(task_id),
            duration: track.duration_secs,
            status: "completed".to_string(),
        })
    }

    async fn split_stems(&self, audio_url: &str) -> Result<StemSplitTask, CollaboratorError> {
        self.simulate_latency().await;
        let task_id = audio_url
            .strip_prefix(&format!("{PLACEHOLDER_CDN}/renders/"))
            .and_then(|rest| rest.strip_suffix(".wav"))
            .ok_or_else(|| CollaboratorError::Remote(format!("unknown audio {audio_url}")))?;
        Self::track(task_id)?;
        Ok(StemSplitTask {
            task_id: task_id.to_string(),
            status: "pending".to_string(),
        })
    }

    async fn stem_split_status(&self, task_id: &str) -> Result<StemSplitStatus, CollaboratorError> {
        self.simulate_latency().await;
        let track = Self::track(task_id)?;
        let stems = track
            .instruments
            .iter()
            .map(|instrument| RemoteStem {
                name: instrument.clone(),
                url: format!("{PLACEHOLDER_CDN}/stems/{}/{instrument}.wav", track.project_id),
                duration: track.duration_secs,
            })
            .collect();
        Ok(StemSplitStatus {
            task_id: task_id.to_string(),
            status: "completed".to_string(),
            stems,
        })
    }
}
