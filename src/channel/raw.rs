// SPDX-License-Identifier: MIT
//! Raw bidirectional message channels.
//!
//! A [`RawChannel`] is one endpoint of an already-established duplex
//! connection carrying text frames: either the bridge over a WebSocket stream
//! (see `ws.rs`) or one half of an in-process pair. The channel adapter sits
//! on top of this and adds envelope normalization and subscriber registries.

use tokio::sync::mpsc;

/// One event surfaced by a raw channel's inbound side.
#[derive(Debug)]
pub enum RawEvent {
    /// One text frame, in arrival order.
    Text(String),
    /// A channel-level error. The channel is unusable afterwards.
    Error(String),
}

/// One endpoint of a raw bidirectional message channel.
///
/// Ordering: frames sent through `outbound` arrive at the peer in send order
/// (mpsc and the WebSocket stream are both FIFO). Dropping the endpoint
/// closes it; the peer observes end-of-stream.
pub struct RawChannel {
    outbound: mpsc::Sender<String>,
    events: mpsc::Receiver<RawEvent>,
}

impl RawChannel {
    pub fn new(outbound: mpsc::Sender<String>, events: mpsc::Receiver<RawEvent>) -> Self {
        Self { outbound, events }
    }

    /// An in-process duplex pair: everything sent on one endpoint arrives on
    /// the other. Used by the locally hosted transport and by tests.
    pub fn pair(capacity: usize) -> (RawChannel, RawChannel) {
        let (a_out, a_rx) = mpsc::channel::<String>(capacity);
        let (b_out, b_rx) = mpsc::channel::<String>(capacity);
        let (a_ev_tx, a_ev_rx) = mpsc::channel::<RawEvent>(capacity);
        let (b_ev_tx, b_ev_rx) = mpsc::channel::<RawEvent>(capacity);

        // a.outbound → b.events and b.outbound → a.events. The forwarder ends
        // when either side hangs up, which closes the peer's event stream.
        tokio::spawn(forward(a_rx, b_ev_tx));
        tokio::spawn(forward(b_rx, a_ev_tx));

        (
            RawChannel::new(a_out, a_ev_rx),
            RawChannel::new(b_out, b_ev_rx),
        )
    }

    /// Split the endpoint into its raw halves. This is the peer-side seam
    /// tests and custom transports drive directly.
    pub fn into_parts(self) -> (mpsc::Sender<String>, mpsc::Receiver<RawEvent>) {
        (self.outbound, self.events)
    }
}

async fn forward(mut rx: mpsc::Receiver<String>, tx: mpsc::Sender<RawEvent>) {
    while let Some(text) = rx.recv().await {
        if tx.send(RawEvent::Text(text)).await.is_err() {
            break;
        }
    }
}
