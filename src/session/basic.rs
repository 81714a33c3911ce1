// SPDX-License-Identifier: MIT
//! Baseline analysis session.
//!
//! Implements exactly as much of the LSP surface as routing requires:
//! answers the `initialize` handshake, tracks open documents, republishes a
//! (currently empty) diagnostics set on every document sync, and rejects
//! unroutable requests with MethodNotFound. Real modeling-language analysis
//! plugs in by providing a different [`SessionFactory`].

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use super::{AnalysisSession, SessionFactory, SessionSender};
use crate::protocol::{
    RpcMessage, INVALID_REQUEST, METHOD_NOT_FOUND, PUBLISH_DIAGNOSTICS, SERVER_NOT_INITIALIZED,
};

pub struct BasicAnalysis {
    outbound: SessionSender,
    /// uri → current text, full-sync only.
    documents: HashMap<String, String>,
    initialized: bool,
}

impl BasicAnalysis {
    pub fn new(outbound: SessionSender) -> Self {
        Self {
            outbound,
            documents: HashMap::new(),
            initialized: false,
        }
    }

    /// URIs of currently open documents, for introspection in tests.
    pub fn open_documents(&self) -> Vec<&str> {
        self.documents.keys().map(String::as_str).collect()
    }

    async fn respond(&self, id: Value, result: Value) -> anyhow::Result<()> {
        self.outbound.send(&RpcMessage::response(id, result)).await?;
        Ok(())
    }

    async fn publish_diagnostics(&self, uri: &str) -> anyhow::Result<()> {
        // Transparent-relay layer: no analysis here, so the set is empty.
        // Publishing on every sync still clears stale markers client-side.
        let note = RpcMessage::notification(
            PUBLISH_DIAGNOSTICS,
            json!({ "uri": uri, "diagnostics": [] }),
        );
        self.outbound.send(&note).await?;
        Ok(())
    }
}

#[async_trait]
impl AnalysisSession for BasicAnalysis {
    async fn handle_message(&mut self, message: Value) -> anyhow::Result<()> {
        // Valid JSON that is not RPC-shaped gets the standard refusal (with a
        // null id — there is no request id to echo) and the session lives on.
        let msg: RpcMessage = match serde_json::from_value(message) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(err = %e, "payload is not a JSON-RPC message");
                self.outbound
                    .send(&RpcMessage::error_response(
                        Value::Null,
                        INVALID_REQUEST,
                        "invalid request",
                    ))
                    .await?;
                return Ok(());
            }
        };
        let method = msg.method.as_deref().unwrap_or_default();
        let params = msg.params.unwrap_or(Value::Null);

        // Requests before the handshake get the LSP ServerNotInitialized code.
        if !self.initialized && method != "initialize" {
            if let Some(id) = msg.id.clone() {
                self.outbound
                    .send(&RpcMessage::error_response(
                        id,
                        SERVER_NOT_INITIALIZED,
                        "server not initialized",
                    ))
                    .await?;
                return Ok(());
            }
        }

        match (method, msg.id) {
            ("initialize", Some(id)) => {
                self.initialized = true;
                self.respond(
                    id,
                    json!({
                        "capabilities": { "textDocumentSync": 1 },
                        "serverInfo": { "name": "modeld", "version": env!("CARGO_PKG_VERSION") }
                    }),
                )
                .await
            }
            ("initialized", None) => Ok(()),
            ("shutdown", Some(id)) => self.respond(id, Value::Null).await,
            ("exit", None) => Ok(()), // lifecycle is owned by the channel
            ("textDocument/didOpen", None) => {
                let uri = params["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let text = params["textDocument"]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                debug!(uri = %uri, "document opened");
                self.documents.insert(uri.clone(), text);
                self.publish_diagnostics(&uri).await
            }
            ("textDocument/didChange", None) => {
                let uri = params["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                if let Some(text) = params["contentChanges"][0]["text"].as_str() {
                    self.documents.insert(uri.clone(), text.to_string());
                }
                self.publish_diagnostics(&uri).await
            }
            ("textDocument/didClose", None) => {
                let uri = params["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.documents.remove(&uri);
                self.publish_diagnostics(&uri).await
            }
            (_, Some(id)) => {
                debug!(method = %method, "unroutable request");
                self.outbound
                    .send(&RpcMessage::error_response(
                        id,
                        METHOD_NOT_FOUND,
                        &format!("method not found: {method}"),
                    ))
                    .await?;
                Ok(())
            }
            (_, None) => {
                debug!(method = %method, "ignoring notification");
                Ok(())
            }
        }
    }
}

/// Factory handing out one [`BasicAnalysis`] per connection.
#[derive(Default)]
pub struct BasicAnalysisFactory;

impl SessionFactory for BasicAnalysisFactory {
    fn create(&self, outbound: SessionSender) -> Box<dyn AnalysisSession> {
        Box::new(BasicAnalysis::new(outbound))
    }
}
