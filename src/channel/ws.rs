// SPDX-License-Identifier: MIT
//! WebSocket ↔ raw channel bridge.
//!
//! One spawned task per connection drives the split sink/stream pair:
//! outbound frames drain from the channel's mpsc, inbound Text frames feed
//! the event stream, Pings are answered, Close (from either side) ends the
//! task. Used on both ends — `connect()` for the remote transport and
//! `bridge()` for listener-accepted streams.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, warn};

use super::raw::{RawChannel, RawEvent};
use crate::error::TransportError;

const FRAME_BUFFER: usize = 64;

/// Connect to a remote WebSocket endpoint and bridge it to a [`RawChannel`].
///
/// No timeout here — the transport provider races this against its
/// configured connection timeout.
pub async fn connect(endpoint: &str) -> Result<RawChannel, TransportError> {
    let (ws, _) = connect_async(endpoint)
        .await
        .map_err(TransportError::connect_failed)?;
    debug!(endpoint = %endpoint, "websocket connected");
    Ok(bridge(ws))
}

/// Bridge an already-established WebSocket stream (client- or server-side)
/// into a [`RawChannel`].
pub fn bridge<S>(ws: WebSocketStream<S>) -> RawChannel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(FRAME_BUFFER);
    let (ev_tx, ev_rx) = mpsc::channel::<RawEvent>(FRAME_BUFFER);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                out = out_rx.recv() => match out {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(err = %e, "ws send error");
                            let _ = ev_tx.send(RawEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    // Local side hung up — say goodbye to the peer.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if ev_tx.send(RawEvent::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(err = %e, "ws error");
                        let _ = ev_tx.send(RawEvent::Error(e.to_string())).await;
                        break;
                    }
                    // Pong / binary frames — nothing to route.
                    _ => {}
                },
            }
        }
        // Dropping ev_tx here closes the inbound event stream, which the
        // adapter observes as channel close.
    });

    RawChannel::new(out_tx, ev_rx)
}
