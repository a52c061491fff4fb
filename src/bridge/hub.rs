//! In-process broadcast hub: the single topic every event flows through.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::EventSink;
use crate::models::event::LifecycleEvent;

/// Raw event messages fanned out to every subscriber.
///
/// Publishing never waits and never fails: without subscribers the
/// message is dropped, and a subscriber that falls more than `capacity`
/// messages behind loses the oldest ones.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Arc<str>>,
}

impl EventHub {
    /// Create a hub buffering up to `capacity` messages per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to messages published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    /// Publish one raw message. Returns the number of subscribers reached.
    pub fn publish_raw(&self, message: impl Into<Arc<str>>) -> usize {
        match self.tx.send(message.into()) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("event dropped: no subscribers");
                0
            }
        }
    }
}

impl EventSink for EventHub {
    fn publish(&self, event: LifecycleEvent) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match event.to_json() {
                Ok(line) => {
                    self.publish_raw(line);
                }
                Err(err) => warn!(%err, "failed to encode event"),
            }
        })
    }
}
