//! Job records and their lifecycle.
//!
//! ## Design
//!
//! - **Record store**: TTL-bounded key-value storage of [`Job`](cadence_core::Job)
//!   records (in-memory, or Redis behind the `redis` feature)
//! - **Lifecycle engine**: the only writer of records; enforces the state
//!   machine, terminal immutability and monotonic progress
//! - **Cancellation registry**: links a job to the token of the pipeline
//!   currently executing it
//! - **Job service**: the submitter-facing API (create, status, result,
//!   cancel)

pub mod cancellation;
pub mod lifecycle;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod service;
pub mod store;

pub use cancellation::{CancellationGuard, CancellationRegistry};
pub use lifecycle::{LifecycleEngine, LifecycleError};
#[cfg(feature = "redis")]
pub use redis_store::RedisJobRecordStore;
pub use service::{JobService, ServiceError};
pub use store::{InMemoryJobRecordStore, JobRecordStore, StoreError, default_ttl};
