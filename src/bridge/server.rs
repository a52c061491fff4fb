//! TCP ingress: drivers inside environments connect and stream events,
//! one JSON object per line. Every line is republished on the hub as-is;
//! the listener decides what it means.

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::EventCodec;
use super::hub::EventHub;

/// Accept publisher connections until `ct` is cancelled.
#[must_use]
pub fn spawn_ingress(
    listener: TcpListener,
    hub: EventHub,
    ct: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let local = listener
        .local_addr()
        .map_or_else(|_| "unknown".to_owned(), |a| a.to_string());
    info!(addr = %local, "event bridge ingress listening");

    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("event bridge ingress shutting down");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let span = info_span!("bridge_connection", %peer);
                            tokio::spawn(
                                handle_connection(stream, hub.clone(), ct.clone()).instrument(span),
                            );
                        }
                        Err(err) => warn!(%err, "bridge accept failed"),
                    }
                }
            }
        }
        .instrument(info_span!("bridge_ingress", addr = %local)),
    )
}

async fn handle_connection(stream: TcpStream, hub: EventHub, ct: CancellationToken) {
    let mut lines = FramedRead::new(stream, EventCodec::new());
    let mut published = 0_u64;
    loop {
        tokio::select! {
            () = ct.cancelled() => break,
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    hub.publish_raw(line);
                    published += 1;
                }
                Some(Err(err)) => {
                    warn!(%err, "closing bridge connection");
                    break;
                }
                None => break,
            }
        }
    }
    debug!(published, "bridge connection closed");
}
