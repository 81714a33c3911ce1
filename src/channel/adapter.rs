// SPDX-License-Identifier: MIT
//! The message channel adapter.
//!
//! Wraps one [`RawChannel`] behind the uniform contract the rest of the
//! crate programs against: `send`, disposable `on_message` / `on_error` /
//! `on_close` registrations, idempotent `close`, and an `is_connected` flag
//! that reflects adapter state only (no liveness probing of the underlying
//! channel).
//!
//! Inbound payloads are normalized at this boundary: envelope-wrapped frames
//! are unwrapped to their inner message, bare messages pass through, and
//! frames that fail to decode are reported through the error registry and
//! dropped — one bad frame never silences later good ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::raw::{RawChannel, RawEvent};
use crate::error::TransportError;
use crate::protocol::{decode_inbound, Envelope};
use crate::registry::{dispatch_contained, Registry, Subscription};

pub type MessageHandler = dyn Fn(&Value) + Send + Sync;
pub type ErrorHandler = dyn Fn(&TransportError) + Send + Sync;
pub type CloseHandler = dyn Fn() + Send + Sync;

pub struct ChannelAdapter {
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    /// Inbound event stream, held until `start()` moves it into the reader task.
    events: Mutex<Option<mpsc::Receiver<RawEvent>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    started: AtomicBool,
    /// When set, outbound messages are wrapped in the routing envelope for
    /// shared/multiplexed channels.
    client_id: Option<String>,
    on_message: Registry<MessageHandler>,
    on_error: Registry<ErrorHandler>,
    on_close: Registry<CloseHandler>,
}

impl std::fmt::Debug for ChannelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAdapter")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ChannelAdapter {
    /// Adapter over a dedicated channel: messages pass through unwrapped.
    pub fn new(raw: RawChannel) -> Arc<Self> {
        Self::build(raw, None)
    }

    /// Adapter over a shared channel: outbound messages are wrapped in an
    /// envelope carrying `client_id`. Inbound normalization is identical in
    /// both modes.
    pub fn enveloped(raw: RawChannel, client_id: impl Into<String>) -> Arc<Self> {
        Self::build(raw, Some(client_id.into()))
    }

    fn build(raw: RawChannel, client_id: Option<String>) -> Arc<Self> {
        let (outbound, events) = raw.into_parts();
        Arc::new(Self {
            outbound: Mutex::new(Some(outbound)),
            events: Mutex::new(Some(events)),
            reader: Mutex::new(None),
            connected: AtomicBool::new(true),
            started: AtomicBool::new(false),
            client_id,
            on_message: Registry::new(),
            on_error: Registry::new(),
            on_close: Registry::new(),
        })
    }

    /// Begin delivering inbound messages. No messages flow before this is
    /// called, so callers can register handlers without racing the reader.
    /// Calling `start()` twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut events = match self.events.lock().expect("adapter lock poisoned").take() {
            Some(events) => events,
            None => return,
        };
        // The reader holds a weak reference so an adapter dropped by its
        // owner stops delivering instead of keeping itself alive.
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let adapter = match weak.upgrade() {
                    Some(adapter) => adapter,
                    None => return,
                };
                if !adapter.is_connected() {
                    // Late frames after close are silently dropped.
                    return;
                }
                match event {
                    RawEvent::Text(raw) => adapter.deliver(&raw),
                    RawEvent::Error(reason) => {
                        warn!(err = %reason, "channel error — closing adapter");
                        let err = TransportError::ChannelError(reason);
                        for handler in adapter.on_error.snapshot() {
                            dispatch_contained(|| handler(&err));
                        }
                        adapter.close();
                        return;
                    }
                }
            }
            // End of stream: the peer hung up.
            if let Some(adapter) = weak.upgrade() {
                debug!("channel closed by peer");
                adapter.close();
            }
        });
        *self.reader.lock().expect("adapter lock poisoned") = Some(handle);
    }

    /// Decode one inbound frame and fan it out. Decode failures go to the
    /// error registry; the reader loop continues either way. A panicking
    /// handler never stops delivery to its siblings or kills the reader.
    fn deliver(&self, raw: &str) {
        match decode_inbound(raw) {
            Ok(inbound) => {
                for handler in self.on_message.snapshot() {
                    dispatch_contained(|| handler(&inbound.message));
                }
            }
            Err(err) => {
                warn!(err = %err, "dropping malformed inbound frame");
                for handler in self.on_error.snapshot() {
                    dispatch_contained(|| handler(&err));
                }
            }
        }
    }

    /// Send one message. Fails with [`TransportError::ChannelClosed`] once
    /// the adapter has been closed.
    pub async fn send(&self, message: &Value) -> Result<(), TransportError> {
        let tx = self
            .outbound
            .lock()
            .expect("adapter lock poisoned")
            .clone()
            .ok_or(TransportError::ChannelClosed)?;
        if !self.is_connected() {
            return Err(TransportError::ChannelClosed);
        }
        let text = match &self.client_id {
            Some(id) => Envelope::wrap(id, message.clone()),
            None => message.to_string(),
        };
        tx.send(text)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub fn on_message(
        &self,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription<MessageHandler> {
        self.on_message.insert(Arc::new(handler))
    }

    pub fn on_error(
        &self,
        handler: impl Fn(&TransportError) + Send + Sync + 'static,
    ) -> Subscription<ErrorHandler> {
        self.on_error.insert(Arc::new(handler))
    }

    pub fn on_close(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> Subscription<CloseHandler> {
        self.on_close.insert(Arc::new(handler))
    }

    /// Reflects the adapter's own flag, not the liveness of the raw channel.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Deterministic, idempotent teardown: the first call flips the
    /// connected flag, detaches the raw channel and reader, fires every
    /// registered close handler exactly once, and clears all registries.
    /// Subsequent calls are no-ops.
    pub fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(reader) = self.reader.lock().expect("adapter lock poisoned").take() {
            reader.abort();
        }
        // Dropping the sender lets the bridge send a Close frame / end the
        // in-process forwarder.
        self.outbound.lock().expect("adapter lock poisoned").take();
        self.on_message.clear();
        self.on_error.clear();
        let close_handlers = self.on_close.take_all();
        for handler in close_handlers {
            dispatch_contained(|| handler());
        }
    }
}
