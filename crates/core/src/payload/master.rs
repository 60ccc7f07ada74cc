//! Master jobs: stems + mix snapshot in, a mastered file out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobPayload, ensure};
use crate::error::DomainResult;
use crate::id::ProjectId;
use crate::job::JobKind;

pub const MIN_VOLUME_DB: f64 = -60.0;
pub const MAX_VOLUME_DB: f64 = 12.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterProfile {
    Clean,
    Warm,
    Loud,
}

impl MasterProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasterProfile::Clean => "clean",
            MasterProfile::Warm => "warm",
            MasterProfile::Loud => "loud",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixPreset {
    Default,
    VocalFriendly,
    BassHeavy,
    Bright,
    Warm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixChannel {
    pub stem_id: String,
    pub volume_db: f64,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
}

impl MixChannel {
    pub fn linear_volume(&self) -> f64 {
        db_to_linear(self.volume_db)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixSnapshot {
    pub channels: Vec<MixChannel>,
    pub preset: MixPreset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocalTake {
    pub section_id: String,
    pub take_id: String,
    pub file_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<i64>,
}

/// Input of a master job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterPayload {
    pub project_id: ProjectId,
    pub profile: MasterProfile,
    pub stem_urls: Vec<String>,
    pub mix_snapshot: MixSnapshot,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vocal_takes: Vec<VocalTake>,
}

fn is_http_url(s: &str) -> bool {
    let rest = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"));
    rest.is_some_and(|r| !r.is_empty())
}

impl JobPayload for MasterPayload {
    const KIND: JobKind = JobKind::Master;

    fn validate(&self) -> DomainResult<()> {
        ensure(!self.stem_urls.is_empty(), || {
            "stemUrls must contain at least one url".to_string()
        })?;
        for url in &self.stem_urls {
            ensure(is_http_url(url), || format!("stemUrls entry is not a url: {url}"))?;
        }

        ensure(!self.mix_snapshot.channels.is_empty(), || {
            "mixSnapshot.channels must contain at least one channel".to_string()
        })?;
        for channel in &self.mix_snapshot.channels {
            ensure(!channel.stem_id.trim().is_empty(), || {
                "mixSnapshot.channels[].stemId is required".to_string()
            })?;
            ensure(
                (MIN_VOLUME_DB..=MAX_VOLUME_DB).contains(&channel.volume_db),
                || {
                    format!(
                        "channel {} volumeDb must be within {MIN_VOLUME_DB}..{MAX_VOLUME_DB}",
                        channel.stem_id
                    )
                },
            )?;
        }

        for take in &self.vocal_takes {
            ensure(
                !take.section_id.trim().is_empty() && !take.take_id.trim().is_empty(),
                || "vocalTakes[] requires sectionId and takeId".to_string(),
            )?;
            ensure(is_http_url(&take.file_url), || {
                format!("vocal take {} fileUrl is not a url", take.take_id)
            })?;
        }
        Ok(())
    }
}

/// Output of a master job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterResult {
    pub file_url: String,
    pub duration: f64,
    pub profile: MasterProfile,
    pub peak_db: f64,
    /// Integrated loudness, whole LUFS.
    pub lufs: i32,
    pub expires_at: DateTime<Utc>,
}

/// Convert a gain in decibels to a linear multiplier. At or below -60 dB is silence.
pub fn db_to_linear(db: f64) -> f64 {
    if db <= MIN_VOLUME_DB {
        return 0.0;
    }
    10f64.powf(db / 20.0)
}
