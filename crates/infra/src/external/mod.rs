//! External collaborators used by the worker pipelines.
//!
//! ## Design
//!
//! - **Capability traits**: [`MusicGenerator`], [`AudioMastering`] and
//!   [`ObjectStorage`] each have an HTTP-backed variant and a placeholder
//!   variant that returns deterministic-shaped values.
//! - **Selected once**: [`Collaborators::from_config`] picks the variants at
//!   startup from the presence of their configuration. Pipelines never
//!   branch on which backend they are talking to.

pub mod http;
pub mod mastering;
pub mod music;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;

pub use mastering::{
    AudioMastering, AudioServiceClient, MasterRequest, MasterResponse, MixSetting, PlaceholderMastering,
    VocalTakeInput,
};
pub use music::{
    GenerateMusicRequest, MusicGenerator, MusicStatus, MusicTask, PlaceholderMusicGenerator, RemoteState,
    RemoteStem, StemSplitStatus, StemSplitTask, SunoClient, TrackOutline,
};
pub use storage::{ObjectStorage, PlaceholderStorage, PublicBucketStorage};

/// Base URL of placeholder-produced assets.
pub const PLACEHOLDER_CDN: &str = "https://cdn.makeasinger.com";

/// Error from an external collaborator call.
///
/// Carries raw detail for logs; pipelines store a sanitised summary instead.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote operation failed: {0}")]
    Remote(String),
}

/// The collaborator set a process runs with.
#[derive(Clone)]
pub struct Collaborators {
    pub music: Arc<dyn MusicGenerator>,
    pub mastering: Arc<dyn AudioMastering>,
    pub storage: Arc<dyn ObjectStorage>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    pub fn from_config(config: &AppConfig) -> Self {
        let delay = config.placeholder_step_delay;

        let music: Arc<dyn MusicGenerator> = match &config.suno {
            Some(suno) => {
                info!(base_url = %suno.base_url, "music generation: http");
                Arc::new(SunoClient::new(&suno.base_url, &suno.api_key))
            }
            None => {
                info!("music generation: placeholder");
                Arc::new(PlaceholderMusicGenerator::new(delay))
            }
        };

        let mastering: Arc<dyn AudioMastering> = match &config.audio_service {
            Some(audio) => {
                info!(url = %audio.url, "mastering: http");
                Arc::new(AudioServiceClient::new(&audio.url, audio.timeout))
            }
            None => {
                info!("mastering: placeholder");
                Arc::new(PlaceholderMastering::new(delay))
            }
        };

        let storage: Arc<dyn ObjectStorage> = match &config.r2_public_url {
            Some(base) => {
                info!(base_url = %base, "storage: public bucket");
                Arc::new(PublicBucketStorage::new(base))
            }
            None => {
                info!("storage: placeholder");
                Arc::new(PlaceholderStorage)
            }
        };

        Self {
            music,
            mastering,
            storage,
        }
    }

    /// All-placeholder set with no simulated latency.
    pub fn placeholders() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
