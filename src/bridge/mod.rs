//! Event bridge: a single-topic, fire-and-forget publish/subscribe channel
//! carrying lifecycle events from session drivers to the state machine.
//!
//! There is no acknowledgement and no replay. Anything published while no
//! listener is subscribed is lost.

pub mod codec;
pub mod hub;
pub mod listener;
pub mod publisher;
pub mod server;

use std::future::Future;
use std::pin::Pin;

use crate::models::event::LifecycleEvent;

/// Destination for lifecycle events.
///
/// Publishing cannot fail from the caller's point of view; transport
/// problems are logged and the event is dropped.
pub trait EventSink: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: LifecycleEvent) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
