// SPDX-License-Identifier: MIT
//! The session dispatcher.
//!
//! A long-lived host that turns channel connections into isolated
//! adapter + session pairs. In multi-connection mode it runs a WebSocket
//! accept loop: every accepted connection gets its own pair, driven by its
//! own task, so a slow or failing session never delays acceptance of new
//! connections or disturbs its siblings. In single-connection mode the host
//! itself is the one channel and exactly one pair exists for its lifetime.
//!
//! The hosting mode is an explicit construction-time parameter — both modes
//! are independently testable, nothing is probed from the environment.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::{ws, ChannelAdapter, RawChannel};
use crate::session::{SessionFactory, SessionSender};

/// How the host receives connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostingMode {
    /// Many independent connection events over the host's lifetime.
    Multi,
    /// The host itself is the one channel.
    Single,
}

pub struct SessionDispatcher {
    mode: HostingMode,
    factory: Arc<dyn SessionFactory>,
}

impl SessionDispatcher {
    pub fn new(mode: HostingMode, factory: Arc<dyn SessionFactory>) -> Self {
        Self { mode, factory }
    }

    pub fn mode(&self) -> HostingMode {
        self.mode
    }

    /// Multi-connection accept loop. Runs until a shutdown signal
    /// (SIGTERM / Ctrl-C) is received.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        anyhow::ensure!(
            self.mode == HostingMode::Multi,
            "run() requires HostingMode::Multi"
        );
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "dispatcher listening");
        }

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown signal received — stopping dispatcher");
                    break;
                }

                conn = listener.accept() => {
                    let (stream, peer) = match conn {
                        Ok(c) => c,
                        Err(e) => {
                            error!(err = %e, "accept error");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "new connection");
                    let factory = self.factory.clone();
                    // One task per connection — the accept loop never waits
                    // on session work.
                    tokio::spawn(async move {
                        match accept_async(stream).await {
                            Ok(ws_stream) => {
                                serve_channel(ws::bridge(ws_stream), factory).await;
                            }
                            Err(e) => warn!(peer = %peer, err = %e, "websocket handshake failed"),
                        }
                    });
                }
            }
        }

        info!("dispatcher stopped");
        Ok(())
    }

    /// Single-connection entry point: bind the one adapter + session pair
    /// and drive it until the channel closes.
    pub async fn serve(&self, raw: RawChannel) -> Result<()> {
        anyhow::ensure!(
            self.mode == HostingMode::Single,
            "serve() requires HostingMode::Single"
        );
        serve_channel(raw, self.factory.clone()).await;
        Ok(())
    }
}

/// Bind one adapter + one fresh session to a channel and pump messages until
/// it closes. Session failures are logged and the session keeps running; a
/// channel error closes only this pair.
pub(crate) async fn serve_channel(raw: RawChannel, factory: Arc<dyn SessionFactory>) {
    let conn_id = Uuid::new_v4();
    let adapter = ChannelAdapter::new(raw);

    // The adapter's handlers are synchronous; session handling is async.
    // An unbounded FIFO inbox bridges the two while preserving order.
    let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<Value>();
    let _message_sub = adapter.on_message(move |message| {
        let _ = inbox_tx.send(message.clone());
    });
    let _error_sub = adapter.on_error(move |err| {
        warn!(conn = %conn_id, err = %err, "channel error");
    });

    let mut session = factory.create(SessionSender::new(adapter.clone()));
    adapter.start();
    debug!(conn = %conn_id, "session started");

    // Strictly one message at a time, in arrival order. When the adapter
    // closes (peer hangup or channel error) the registries are cleared, the
    // inbox sender drops, and this loop ends.
    while let Some(message) = inbox_rx.recv().await {
        if let Err(e) = session.handle_message(message).await {
            warn!(conn = %conn_id, err = %e, "session failed to handle message — dropped");
        }
    }

    session.shutdown().await;
    adapter.close();
    debug!(conn = %conn_id, "session ended");
}

/// Resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C; elsewhere Ctrl-C only.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(err = %e, "failed to register SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AnalysisSession;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every URI it sees; shared log keyed by session number proves
    /// (or disproves) isolation.
    struct RecordingSession {
        index: usize,
        seen: Arc<Mutex<Vec<(usize, String)>>>,
    }

    #[async_trait]
    impl AnalysisSession for RecordingSession {
        async fn handle_message(&mut self, message: Value) -> Result<()> {
            if let Some(uri) = message["params"]["uri"].as_str() {
                self.seen
                    .lock()
                    .unwrap()
                    .push((self.index, uri.to_string()));
            }
            Ok(())
        }
    }

    struct RecordingFactory {
        created: AtomicUsize,
        seen: Arc<Mutex<Vec<(usize, String)>>>,
    }

    impl SessionFactory for RecordingFactory {
        fn create(&self, _outbound: SessionSender) -> Box<dyn AnalysisSession> {
            let index = self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(RecordingSession {
                index,
                seen: self.seen.clone(),
            })
        }
    }

    /// A session whose handler always errors.
    struct FailingSession;

    #[async_trait]
    impl AnalysisSession for FailingSession {
        async fn handle_message(&mut self, _message: Value) -> Result<()> {
            anyhow::bail!("synthetic session failure")
        }
    }

    #[tokio::test]
    async fn each_connection_gets_its_own_session() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(RecordingFactory {
            created: AtomicUsize::new(0),
            seen: seen.clone(),
        });

        let (client_a, server_a) = RawChannel::pair(8);
        let (client_b, server_b) = RawChannel::pair(8);
        tokio::spawn(serve_channel(server_a, factory.clone()));
        tokio::spawn(serve_channel(server_b, factory.clone()));

        let (a_tx, _a_rx) = client_a.into_parts();
        let (b_tx, _b_rx) = client_b.into_parts();
        a_tx.send(json!({"method": "open", "params": {"uri": "model://a"}}).to_string())
            .await
            .unwrap();
        b_tx.send(json!({"method": "open", "params": {"uri": "model://b"}}).to_string())
            .await
            .unwrap();

        // Close both channels so the serve loops finish.
        drop(a_tx);
        drop(b_tx);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        let seen = seen.lock().unwrap();
        // Each URI was observed by exactly one distinct session instance.
        assert_eq!(seen.len(), 2);
        let a = seen.iter().find(|(_, uri)| uri == "model://a").unwrap();
        let b = seen.iter().find(|(_, uri)| uri == "model://b").unwrap();
        assert_ne!(a.0, b.0);
    }

    #[tokio::test]
    async fn failing_session_does_not_end_the_connection() {
        struct FailingFactory;
        impl SessionFactory for FailingFactory {
            fn create(&self, _outbound: SessionSender) -> Box<dyn AnalysisSession> {
                Box::new(FailingSession)
            }
        }

        let (client, server) = RawChannel::pair(8);
        let handle = tokio::spawn(serve_channel(server, Arc::new(FailingFactory)));

        let (tx, _rx) = client.into_parts();
        tx.send(r#"{"method":"boom"}"#.into()).await.unwrap();
        tx.send(r#"{"method":"boom-again"}"#.into()).await.unwrap();
        // Still alive after two handler failures — only dropping the channel
        // ends the serve loop.
        assert!(!handle.is_finished());
        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn mode_mismatch_is_rejected() {
        struct FailingFactory;
        impl SessionFactory for FailingFactory {
            fn create(&self, _outbound: SessionSender) -> Box<dyn AnalysisSession> {
                Box::new(FailingSession)
            }
        }
        let single = SessionDispatcher::new(HostingMode::Single, Arc::new(FailingFactory));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(single.run(listener).await.is_err());
    }
}
