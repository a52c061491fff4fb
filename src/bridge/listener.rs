//! Event listener: decodes hub messages and feeds the state machine.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::hub::EventHub;
use crate::models::event::LifecycleEvent;
use crate::orchestrator::state_machine::StateMachine;

/// Subscribe to `hub` and apply every recognised event, one at a time in
/// arrival order, until `ct` is cancelled.
///
/// The subscription is taken before this function returns, so nothing
/// published afterwards is missed.
#[must_use]
pub fn spawn_event_listener(
    hub: &EventHub,
    machine: Arc<StateMachine>,
    ct: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut rx = hub.subscribe();
    tokio::spawn(
        async move {
            loop {
                let message = tokio::select! {
                    () = ct.cancelled() => {
                        info!("event listener shutting down");
                        break;
                    }
                    received = rx.recv() => received,
                };

                match message {
                    Ok(raw) => {
                        let Some(event) = LifecycleEvent::from_json(&raw) else {
                            debug!(message = %raw, "discarding unrecognised event");
                            continue;
                        };
                        if let Err(err) = machine.apply(&event).await {
                            warn!(
                                session_id = event.session_id,
                                event_type = event.kind.wire_name(),
                                %err,
                                "failed to apply event"
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener fell behind; events lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        .instrument(info_span!("event_listener")),
    )
}
