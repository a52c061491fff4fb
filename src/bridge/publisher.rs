//! Bridge client used by drivers running inside execution environments.

use std::future::Future;
use std::pin::Pin;

use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use super::codec::EventCodec;
use super::EventSink;
use crate::models::event::LifecycleEvent;
use crate::{AppError, Result};

type Connection = FramedWrite<TcpStream, EventCodec>;

/// Publishes events to a remote bridge ingress over TCP.
///
/// Connects lazily. A failed send drops the event and the connection; the
/// next publish reconnects. No buffering, no retry.
pub struct BridgePublisher {
    addr: String,
    conn: Mutex<Option<Connection>>,
}

impl BridgePublisher {
    /// Publisher targeting `addr` (`host:port`).
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    async fn send_line(&self, line: String) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|err| AppError::Bridge(format!("connect {}: {err}", self.addr)))?;
            stream.set_nodelay(true)?;
            *guard = Some(FramedWrite::new(stream, EventCodec::new()));
        }
        let Some(conn) = guard.as_mut() else {
            return Err(AppError::Bridge("no connection".into()));
        };
        if let Err(err) = conn.send(line).await {
            *guard = None;
            return Err(err);
        }
        Ok(())
    }
}

impl EventSink for BridgePublisher {
    fn publish(&self, event: LifecycleEvent) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let event_type = event.kind.wire_name();
            let line = match event.to_json() {
                Ok(line) => line,
                Err(err) => {
                    warn!(%err, "failed to encode event");
                    return;
                }
            };
            match self.send_line(line).await {
                Ok(()) => debug!(session_id = event.session_id, event_type, "event published"),
                Err(err) => warn!(
                    session_id = event.session_id,
                    event_type,
                    %err,
                    "event dropped"
                ),
            }
        })
    }
}
