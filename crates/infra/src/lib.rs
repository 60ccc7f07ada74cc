//! Infrastructure layer: record stores, task queue, pipelines, collaborators.
//!
//! ## Layout
//!
//! - [`jobs`]: job records, the lifecycle engine and the submitter API
//! - [`queue`]: the in-process task queue with one lane per job kind
//! - [`pipeline`]: the render and master workflows run by queue handlers
//! - [`external`]: music generation, mastering and object storage clients
//! - [`config`]: environment-driven configuration

pub mod config;
pub mod external;
pub mod jobs;
pub mod pipeline;
pub mod queue;

#[cfg(test)]
mod integration_tests;
