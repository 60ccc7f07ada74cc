//! `cadence-core` — the job model.
//!
//! This crate contains **pure** types and transition rules (no IO): job
//! records, identifiers, payloads and results for each job kind.

pub mod error;
pub mod id;
pub mod job;
pub mod payload;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, ProjectId, SubscriberId, TaskId};
pub use job::{Job, JobKind, JobStatus, RECORD_TTL};
pub use payload::{JobPayload, MasterPayload, MasterResult, RenderPayload, RenderResult};
