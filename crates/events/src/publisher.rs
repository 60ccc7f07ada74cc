//! Publishing side of the event stream, as seen by workers.

use std::sync::Arc;

use crate::event::JobEvent;
use crate::hub::HubError;

/// Something job events can be published to.
///
/// `publish` must not block on subscribers: an implementation enqueues and
/// returns. The [`NotificationHub`](crate::NotificationHub) is the production
/// implementation.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: JobEvent) -> Result<(), HubError>;
}

impl<P> EventPublisher for Arc<P>
where
    P: EventPublisher + ?Sized,
{
    fn publish(&self, event: JobEvent) -> Result<(), HubError> {
        (**self).publish(event)
    }
}
