//! Job payloads and results.
//!
//! Every job kind has a typed payload (its immutable input) and a typed
//! result (its output, fixed in shape regardless of which backend produced
//! it). Both travel through the job record as JSON.
//!
//! ## Validation
//!
//! Payloads are validated twice:
//! - at submission, before a record is created
//! - by the pipeline after the task body is deserialized (a malformed payload
//!   is a fatal, non-retryable failure for that task)

pub mod master;
pub mod render;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DomainResult;
use crate::job::JobKind;

pub use master::{
    MasterPayload, MasterProfile, MasterResult, MixChannel, MixPreset, MixSnapshot, VocalTake,
    db_to_linear,
};
pub use render::{
    Arrangement, BpmConfig, BpmMode, Brief, Density, Emphasis, Genre, Groove, Instrument,
    KeyConfig, KeyMode, KeyResult, RenderPayload, RenderResult, Scale, SectionEmphasis,
    SectionType, SongSection, StemResult, Tonic, placeholder_waveform,
};

/// A typed job input bound to exactly one job kind.
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The job kind this payload is processed by.
    const KIND: JobKind;

    /// Structural validation (ranges, required collections).
    fn validate(&self) -> DomainResult<()>;
}

pub(crate) fn ensure(condition: bool, msg: impl FnOnce() -> String) -> DomainResult<()> {
    if condition {
        Ok(())
    } else {
        Err(crate::error::DomainError::validation(msg()))
    }
}
