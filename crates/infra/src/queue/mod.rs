//! Durable-style task queue with named lanes.
//!
//! Producers enqueue a [`TaskBody`] on a [`Lane`]; each lane runs a bounded
//! worker pool that hands tasks to the lane's [`TaskHandler`].

pub mod executor;
pub mod types;

pub use executor::{
    InProcessTaskQueue, QueueConfig, QueueError, QueueStats, TaskHandler, TaskQueue, TaskQueueBuilder,
    TaskRecord, TaskState,
};
pub use types::{Lane, RetryPolicy, Task, TaskBody, TaskOutcome};
