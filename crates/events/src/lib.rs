//! `cadence-events` — real-time job event fan-out.

pub mod event;
pub mod hub;
pub mod publisher;

pub use event::{ControlMessage, EventError, JobEvent, MASTER_FAILED, RENDER_FAILED};
pub use hub::{
    DEFAULT_SUBSCRIBER_BUFFER, HubConfig, HubError, HubStats, NotificationHub, Subscription,
};
pub use publisher::EventPublisher;
