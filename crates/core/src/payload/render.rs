//! Render jobs: brief + arrangement in, stems out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobPayload, ensure};
use crate::error::DomainResult;
use crate::id::ProjectId;
use crate::job::JobKind;

pub const DEFAULT_BPM: u16 = 120;
pub const MIN_BPM: u16 = 40;
pub const MAX_BPM: u16 = 220;
pub const MAX_SECTION_BARS: u16 = 64;
pub const MAX_VIBES: usize = 5;
pub const WAVEFORM_POINTS: usize = 100;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    Pop,
    Rock,
    Hiphop,
    Rnb,
    Electronic,
    Jazz,
    Country,
    Folk,
    Classical,
    Latin,
    Reggae,
    Blues,
}

impl Genre {
    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Pop => "pop",
            Genre::Rock => "rock",
            Genre::Hiphop => "hiphop",
            Genre::Rnb => "rnb",
            Genre::Electronic => "electronic",
            Genre::Jazz => "jazz",
            Genre::Country => "country",
            Genre::Folk => "folk",
            Genre::Classical => "classical",
            Genre::Latin => "latin",
            Genre::Reggae => "reggae",
            Genre::Blues => "blues",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Intro,
    Verse,
    Prechorus,
    Chorus,
    Bridge,
    Outro,
    Instrumental,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Drums,
    Bass,
    Piano,
    Guitar,
    Synth,
    Strings,
    Brass,
    Woodwinds,
    Percussion,
    Pads,
    Lead,
    Fx,
}

impl Instrument {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Drums => "drums",
            Instrument::Bass => "bass",
            Instrument::Piano => "piano",
            Instrument::Guitar => "guitar",
            Instrument::Synth => "synth",
            Instrument::Strings => "strings",
            Instrument::Brass => "brass",
            Instrument::Woodwinds => "woodwinds",
            Instrument::Percussion => "percussion",
            Instrument::Pads => "pads",
            Instrument::Lead => "lead",
            Instrument::Fx => "fx",
        }
    }
}

impl core::fmt::Display for Instrument {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BpmMode {
    Auto,
    Range,
    Fixed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    Auto,
    Manual,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tonic {
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

impl Tonic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tonic::C => "C",
            Tonic::CSharp => "C#",
            Tonic::D => "D",
            Tonic::DSharp => "D#",
            Tonic::E => "E",
            Tonic::F => "F",
            Tonic::FSharp => "F#",
            Tonic::G => "G",
            Tonic::GSharp => "G#",
            Tonic::A => "A",
            Tonic::ASharp => "A#",
            Tonic::B => "B",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Major,
    Minor,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Major => "major",
            Scale::Minor => "minor",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    Minimal,
    Medium,
    Full,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Groove {
    Straight,
    Swing,
    HalfTime,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emphasis {
    Bigger,
    Biggest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BpmConfig {
    pub mode: BpmMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    pub mode: KeyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tonic: Option<Tonic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongSection {
    pub id: String,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub bars: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brief {
    pub genre: Genre,
    pub vibes: Vec<String>,
    pub bpm: BpmConfig,
    pub key: KeyConfig,
    pub structure: Vec<SongSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionEmphasis {
    pub section_id: String,
    pub emphasis: Emphasis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrangement {
    pub instruments: Vec<Instrument>,
    pub density: Density,
    pub groove: Groove,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub section_emphasis: Vec<SectionEmphasis>,
}

/// Input of a render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPayload {
    pub project_id: ProjectId,
    pub brief: Brief,
    pub arrangement: Arrangement,
}

impl RenderPayload {
    /// BPM the track is rendered at (the configured value, else the default).
    pub fn effective_bpm(&self) -> u16 {
        self.brief.bpm.value.unwrap_or(DEFAULT_BPM)
    }

    /// Key the track is rendered in. Each half falls back independently to C major.
    pub fn effective_key(&self) -> KeyResult {
        KeyResult {
            tonic: self.brief.key.tonic.unwrap_or(Tonic::C),
            scale: self.brief.key.scale.unwrap_or(Scale::Major),
        }
    }

    pub fn total_bars(&self) -> u32 {
        self.brief.structure.iter().map(|s| u32::from(s.bars)).sum()
    }

    /// Duration in seconds implied by the structure, assuming 4/4.
    pub fn structure_duration_secs(&self) -> f64 {
        f64::from(self.total_bars() * 4) / f64::from(self.effective_bpm()) * 60.0
    }

    /// Text prompt describing the requested track.
    pub fn music_prompt(&self) -> String {
        let key = self.effective_key();
        format!(
            "Create a {genre} instrumental track at {bpm} BPM in {tonic} {scale}. Style: {genre}. Vibes: {vibes}",
            genre = self.brief.genre.as_str(),
            bpm = self.effective_bpm(),
            tonic = key.tonic.as_str(),
            scale = key.scale.as_str(),
            vibes = self.brief.vibes.join(", "),
        )
    }
}

impl JobPayload for RenderPayload {
    const KIND: JobKind = JobKind::Render;

    fn validate(&self) -> DomainResult<()> {
        let brief = &self.brief;
        ensure(
            (1..=MAX_VIBES).contains(&brief.vibes.len()),
            || format!("brief.vibes must contain 1 to {MAX_VIBES} entries"),
        )?;

        let bpm_in_range = |v: Option<u16>| v.is_none_or(|v| (MIN_BPM..=MAX_BPM).contains(&v));
        ensure(
            bpm_in_range(brief.bpm.value) && bpm_in_range(brief.bpm.min) && bpm_in_range(brief.bpm.max),
            || format!("brief.bpm values must be within {MIN_BPM}-{MAX_BPM}"),
        )?;
        match brief.bpm.mode {
            BpmMode::Fixed => ensure(brief.bpm.value.is_some(), || {
                "brief.bpm.value is required in fixed mode".to_string()
            })?,
            BpmMode::Range => {
                if let (Some(min), Some(max)) = (brief.bpm.min, brief.bpm.max) {
                    ensure(min <= max, || "brief.bpm.min must not exceed max".to_string())?;
                }
            }
            BpmMode::Auto => {}
        }

        ensure(!brief.structure.is_empty(), || {
            "brief.structure must contain at least one section".to_string()
        })?;
        for section in &brief.structure {
            ensure(!section.id.trim().is_empty(), || {
                "brief.structure[].id is required".to_string()
            })?;
            ensure((1..=MAX_SECTION_BARS).contains(&section.bars), || {
                format!("section {} bars must be within 1-{MAX_SECTION_BARS}", section.id)
            })?;
        }

        ensure(!self.arrangement.instruments.is_empty(), || {
            "arrangement.instruments must contain at least one instrument".to_string()
        })?;
        for emphasis in &self.arrangement.section_emphasis {
            ensure(!emphasis.section_id.trim().is_empty(), || {
                "arrangement.sectionEmphasis[].sectionId is required".to_string()
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyResult {
    pub tonic: Tonic,
    pub scale: Scale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StemResult {
    pub id: String,
    /// Instrument label. Remote separation may return names outside [`Instrument`].
    pub instrument: String,
    pub file_url: String,
    pub duration: f64,
    pub waveform_data: Vec<f64>,
}

/// Output of a render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    pub id: String,
    pub bpm: u16,
    pub duration: f64,
    pub key: KeyResult,
    pub created_at: DateTime<Utc>,
    pub stems: Vec<StemResult>,
}

/// Deterministic waveform preview used when no analysis is available.
pub fn placeholder_waveform(points: usize) -> Vec<f64> {
    (0..points).map(|i| 0.1 + (i % 10) as f64 / 15.0).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::DomainError;

    pub(crate) fn sample_payload() -> RenderPayload {
        serde_json::from_value(serde_json::json!({
            "projectId": "0190e8a4-7a2e-7c3b-9a51-3f1f8d2b4c10",
            "brief": {
                "genre": "pop",
                "vibes": ["uplifting"],
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
                "groove": "half_time"
            }
        }))
        .unwrap()
    }

    #[test]
    fn sample_payload_is_valid() {
        let payload = sample_payload();
        assert!(payload.validate().is_ok());
        assert_eq!(payload.arrangement.groove, Groove::HalfTime);
        assert_eq!(payload.brief.key.tonic, Some(Tonic::FSharp));
    }

    #[test]
    fn duration_follows_bars_and_bpm() {
        let payload = sample_payload();
        assert_eq!(payload.total_bars(), 24);
        // 24 bars * 4 beats / 100 bpm * 60s
        assert!((payload.structure_duration_secs() - 57.6).abs() < 1e-9);
    }

    #[test]
    fn key_and_bpm_fall_back_to_defaults() {
        let mut payload = sample_payload();
        payload.brief.bpm = BpmConfig { mode: BpmMode::Auto, value: None, min: None, max: None };
        payload.brief.key = KeyConfig { mode: KeyMode::Auto, tonic: None, scale: None };

        assert_eq!(payload.effective_bpm(), DEFAULT_BPM);
        assert_eq!(payload.effective_key(), KeyResult { tonic: Tonic::C, scale: Scale::Major });
        assert!(payload.music_prompt().contains("120 BPM in C major"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut payload = sample_payload();
        payload.brief.bpm.value = Some(300);
        assert!(matches!(payload.validate(), Err(DomainError::Validation(_))));

        let mut payload = sample_payload();
        payload.brief.structure[0].bars = 65;
        assert!(payload.validate().is_err());

        let mut payload = sample_payload();
        payload.brief.structure.clear();
        assert!(payload.validate().is_err());

        let mut payload = sample_payload();
        payload.arrangement.instruments.clear();
        assert!(payload.validate().is_err());

        let mut payload = sample_payload();
        payload.brief.vibes = vec!["a".into(); 6];
        assert!(payload.validate().is_err());
    }

    #[test]
    fn unknown_enum_value_fails_to_deserialize() {
        let mut raw = serde_json::to_value(sample_payload()).unwrap();
        raw["brief"]["genre"] = "polka".into();
        assert!(serde_json::from_value::<RenderPayload>(raw).is_err());
    }

    #[test]
    fn placeholder_waveform_shape() {
        let wave = placeholder_waveform(WAVEFORM_POINTS);
        assert_eq!(wave.len(), 100);
        assert!((wave[0] - 0.1).abs() < 1e-9);
        assert!((wave[9] - (0.1 + 9.0 / 15.0)).abs() < 1e-9);
        assert_eq!(wave[3], wave[13]);
    }
}
