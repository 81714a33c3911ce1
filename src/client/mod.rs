// SPDX-License-Identifier: MIT
//! The protocol client service.
//!
//! Owns the logical LSP session on top of whatever channel the transport
//! provider currently supplies. Responsibilities: the `initialize`
//! handshake, request/response correlation, republishing
//! `textDocument/publishDiagnostics` to subscribers, and handing out one
//! document plugin per URI for the editor surface to attach to.
//!
//! The service is an explicitly constructed, explicitly disposed object —
//! whoever creates it owns its lifecycle, and `dispose()` is the single
//! teardown path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::channel::ChannelAdapter;
use crate::error::TransportError;
use crate::protocol::{
    Diagnostic, Position, PublishDiagnosticsParams, RpcMessage, PUBLISH_DIAGNOSTICS,
};
use crate::registry::{dispatch_contained, Registry, Subscription};
use crate::transport::TransportProvider;

pub type DiagnosticsHandler = dyn Fn(&str, &[Diagnostic]) + Send + Sync;

pub struct LspClientService {
    provider: TransportProvider,
    inner: Arc<ClientInner>,
}

struct ClientInner {
    initialized: AtomicBool,
    connected_once: AtomicBool,
    disposed: AtomicBool,
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<RpcMessage>>>,
    diagnostics: Registry<DiagnosticsHandler>,
    plugins: Mutex<HashMap<String, Arc<DocumentPlugin>>>,
    active: Mutex<Option<Arc<ChannelAdapter>>>,
}

impl LspClientService {
    pub fn new(provider: TransportProvider) -> Self {
        Self {
            provider,
            inner: Arc::new(ClientInner {
                initialized: AtomicBool::new(false),
                connected_once: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                next_id: AtomicI64::new(1),
                pending: Mutex::new(HashMap::new()),
                diagnostics: Registry::new(),
                plugins: Mutex::new(HashMap::new()),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn provider(&self) -> &TransportProvider {
        &self.provider
    }

    /// Obtain a transport from the provider and run the initialize
    /// handshake. Only after the handshake response arrives does
    /// `is_initialized()` flip to true.
    pub async fn connect(&self) -> Result<(), TransportError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.inner.initialized.store(false, Ordering::SeqCst);
        let adapter = self.provider.connect().await?;
        self.attach(adapter).await
    }

    /// Tear down the current transport, rebuild it (remote first), and
    /// re-run the handshake. Open documents are not touched here — the
    /// document-sync collaborator resynchronizes them once the handshake
    /// completes.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.inner.initialized.store(false, Ordering::SeqCst);
        let adapter = self.provider.reconnect().await?;
        self.attach(adapter).await
    }

    async fn attach(&self, adapter: Arc<ChannelAdapter>) -> Result<(), TransportError> {
        // Waiters from the previous transport can never be answered now.
        self.inner.fail_pending();

        let weak = Arc::downgrade(&self.inner);
        let _message_sub = adapter.on_message(move |value| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_inbound(value);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        let _close_sub = adapter.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                debug!("transport closed — client uninitialized until next handshake");
                inner.initialized.store(false, Ordering::SeqCst);
                inner.fail_pending();
            }
        });

        *self.inner.active.lock().expect("client lock poisoned") = Some(adapter.clone());
        self.inner.connected_once.store(true, Ordering::SeqCst);
        adapter.start();

        self.handshake().await
    }

    async fn handshake(&self) -> Result<(), TransportError> {
        let response = self
            .inner
            .request_raw(
                "initialize",
                json!({
                    "processId": Value::Null,
                    "capabilities": {},
                    "clientInfo": { "name": "modeld", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;
        if let Some(err) = response.error {
            return Err(TransportError::ConnectFailed(format!(
                "initialize failed: {} (code {})",
                err.message, err.code
            )));
        }
        self.inner
            .notify_raw("initialized", json!({}))
            .await?;
        self.inner.initialized.store(true, Ordering::SeqCst);
        info!("language server handshake complete");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Send a request and await its response. Fails with `NotInitialized`
    /// before the handshake has completed — it never hangs on a transport
    /// that was never set up.
    pub async fn request(&self, method: &str, params: Value) -> Result<RpcMessage, TransportError> {
        if !self.is_initialized() {
            return Err(TransportError::NotInitialized);
        }
        self.inner.request_raw(method, params).await
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        if !self.is_initialized() {
            return Err(TransportError::NotInitialized);
        }
        self.inner.notify_raw(method, params).await
    }

    /// Subscribe to diagnostics republishing. Every notification is relayed
    /// in arrival order, unfiltered.
    pub fn on_diagnostics(
        &self,
        handler: impl Fn(&str, &[Diagnostic]) + Send + Sync + 'static,
    ) -> Subscription<DiagnosticsHandler> {
        self.inner.diagnostics.insert(Arc::new(handler))
    }

    /// The per-document integration object for `uri`, or `None` if the
    /// service has never been connected. Repeated calls for the same URI
    /// return the same object.
    pub fn get_plugin(&self, uri: &str) -> Option<Arc<DocumentPlugin>> {
        if !self.inner.connected_once.load(Ordering::SeqCst) {
            return None;
        }
        let mut plugins = self.inner.plugins.lock().expect("client lock poisoned");
        Some(
            plugins
                .entry(uri.to_string())
                .or_insert_with(|| {
                    Arc::new(DocumentPlugin {
                        uri: uri.to_string(),
                        inner: Arc::downgrade(&self.inner),
                    })
                })
                .clone(),
        )
    }

    /// Single teardown path: disposes the provider, closes the transport,
    /// and clears every registry. No diagnostics are delivered afterwards.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.initialized.store(false, Ordering::SeqCst);
        let adapter = self
            .inner
            .active
            .lock()
            .expect("client lock poisoned")
            .take();
        if let Some(adapter) = adapter {
            adapter.close();
        }
        self.provider.dispose();
        self.inner.diagnostics.clear();
        self.inner.fail_pending();
        self.inner.plugins.lock().expect("client lock poisoned").clear();
    }
}

impl ClientInner {
    /// Route one inbound message: responses resolve their pending waiter,
    /// diagnostics notifications fan out to subscribers, anything else is
    /// logged and dropped (this layer routes, it does not interpret).
    fn handle_inbound(&self, value: &Value) {
        let msg: RpcMessage = match serde_json::from_value(value.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(err = %e, "dropping non-RPC inbound message");
                return;
            }
        };

        if msg.is_response() {
            let id = msg.id.as_ref().and_then(Value::as_i64);
            if let Some(id) = id {
                let waiter = self
                    .pending
                    .lock()
                    .expect("client lock poisoned")
                    .remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => debug!(id, "response with no pending request"),
                }
            }
            return;
        }

        if msg.is_notification() {
            let method = msg.method.as_deref().unwrap_or_default();
            if method == PUBLISH_DIAGNOSTICS {
                let params: PublishDiagnosticsParams =
                    match serde_json::from_value(msg.params.unwrap_or(Value::Null)) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(err = %e, "malformed publishDiagnostics — dropped");
                            return;
                        }
                    };
                for handler in self.diagnostics.snapshot() {
                    dispatch_contained(|| handler(&params.uri, &params.diagnostics));
                }
            } else {
                debug!(method = %method, "ignoring server notification");
            }
        }
    }

    async fn request_raw(&self, method: &str, params: Value) -> Result<RpcMessage, TransportError> {
        let adapter = self.current_adapter()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("client lock poisoned")
            .insert(id, tx);

        let message = RpcMessage::request(id, method, params);
        let value = serde_json::to_value(&message)
            .map_err(|e| TransportError::MalformedMessage(e.to_string()))?;
        if let Err(e) = adapter.send(&value).await {
            self.pending
                .lock()
                .expect("client lock poisoned")
                .remove(&id);
            return Err(e);
        }

        // Resolves when the response arrives; errors if the transport closes
        // or is replaced first. No handshake/request timeout at this layer.
        rx.await.map_err(|_| TransportError::ChannelClosed)
    }

    async fn notify_raw(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let adapter = self.current_adapter()?;
        let message = RpcMessage::notification(method, params);
        let value = serde_json::to_value(&message)
            .map_err(|e| TransportError::MalformedMessage(e.to_string()))?;
        adapter.send(&value).await
    }

    fn current_adapter(&self) -> Result<Arc<ChannelAdapter>, TransportError> {
        self.active
            .lock()
            .expect("client lock poisoned")
            .clone()
            .ok_or(TransportError::ChannelClosed)
    }

    /// Drop all pending waiters; their `rx.await` resolves to `ChannelClosed`.
    fn fail_pending(&self) {
        self.pending
            .lock()
            .expect("client lock poisoned")
            .clear();
    }
}

// ─── Document plugin ─────────────────────────────────────────────────────────

/// Live integration object for one open document. The editor surface holds
/// this to attach completions/hover to the document; its identity (one per
/// URI) is the contract, the request methods are thin passthroughs.
pub struct DocumentPlugin {
    uri: String,
    inner: Weak<ClientInner>,
}

impl DocumentPlugin {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub async fn completion(&self, position: Position) -> Result<Option<Value>, TransportError> {
        self.document_request("textDocument/completion", position)
            .await
    }

    pub async fn hover(&self, position: Position) -> Result<Option<Value>, TransportError> {
        self.document_request("textDocument/hover", position).await
    }

    async fn document_request(
        &self,
        method: &str,
        position: Position,
    ) -> Result<Option<Value>, TransportError> {
        let inner = self.inner.upgrade().ok_or(TransportError::ChannelClosed)?;
        if !inner.initialized.load(Ordering::SeqCst) {
            return Err(TransportError::NotInitialized);
        }
        let params = json!({
            "textDocument": { "uri": self.uri },
            "position": position,
        });
        let response = inner.request_raw(method, params).await?;
        if let Some(err) = response.error {
            // Server-side refusal is an empty result for the editor surface.
            debug!(method = %method, code = err.code, err = %err.message, "document request refused");
            return Ok(None);
        }
        Ok(response.result)
    }
}
