// SPDX-License-Identifier: MIT
//! Wire types for the JSON-RPC 2.0 message layer.
//!
//! These types mirror the LSP 3.17 wire format closely enough to route real
//! traffic while staying agnostic to method semantics — this layer inspects
//! structural shape only (request vs response vs notification, envelope vs
//! bare message), never the meaning of a method.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

// ─── JSON-RPC 2.0 message ────────────────────────────────────────────────────

pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known JSON-RPC 2.0 error codes used when routing fails.
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
/// LSP: request received before the `initialize` request completed.
pub const SERVER_NOT_INITIALIZED: i64 = -32002;

/// One JSON-RPC 2.0 message: request, response, or notification.
///
/// All payload fields are optional so a single type can represent every
/// shape that crosses the wire; helpers below construct the specific shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcMessage {
    pub fn request(id: i64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(Value::from(id)),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn response(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: Value, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// A message with an `id` but no `method` is a response to one of ours.
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }

    /// A message with a `method` but no `id` is a server-initiated notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ─── Envelope ────────────────────────────────────────────────────────────────

/// Routing wrapper used on shared/multiplexed channels only.
///
/// `{ "clientId": "...", "message": { ... } }` — the presence of both fields
/// is what structurally distinguishes an envelope from a bare message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub client_id: String,
    pub message: Value,
}

impl Envelope {
    pub fn wrap(client_id: &str, message: Value) -> String {
        serde_json::json!({ "clientId": client_id, "message": message }).to_string()
    }
}

/// One normalized inbound payload: the bare message plus, when the payload
/// was enveloped, the client id it was routed under.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub client_id: Option<String>,
    pub message: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InboundFrame {
    Envelope(Envelope),
    Bare(Value),
}

/// Decode one raw text payload from a channel into a normalized message.
///
/// Envelopes are unwrapped; anything else passes through unchanged. A payload
/// that is not valid JSON at all is a [`TransportError::MalformedMessage`] —
/// callers report it through the error registry and drop it.
pub fn decode_inbound(raw: &str) -> Result<InboundMessage, TransportError> {
    let frame: InboundFrame = serde_json::from_str(raw)
        .map_err(|e| TransportError::MalformedMessage(e.to_string()))?;
    Ok(match frame {
        InboundFrame::Envelope(env) => InboundMessage {
            client_id: Some(env.client_id),
            message: env.message,
        },
        InboundFrame::Bare(value) => InboundMessage {
            client_id: None,
            message: value,
        },
    })
}

// ─── Diagnostics ─────────────────────────────────────────────────────────────

/// Severity levels matching LSP `DiagnosticSeverity` (1-based on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

impl From<u8> for DiagnosticSeverity {
    /// 1 = error, 2 = warning, 3 = info, 4 = hint. Unknown values degrade to
    /// `Information` rather than failing the whole notification.
    fn from(n: u8) -> Self {
        match n {
            1 => DiagnosticSeverity::Error,
            2 => DiagnosticSeverity::Warning,
            4 => DiagnosticSeverity::Hint,
            _ => DiagnosticSeverity::Information,
        }
    }
}

impl From<DiagnosticSeverity> for u8 {
    fn from(s: DiagnosticSeverity) -> u8 {
        match s {
            DiagnosticSeverity::Error => 1,
            DiagnosticSeverity::Warning => 2,
            DiagnosticSeverity::Information => 3,
            DiagnosticSeverity::Hint => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A single diagnostic finding published by the analysis backend.
///
/// This layer is a transparent relay: no filtering, no deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<DiagnosticSeverity>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Params of a `textDocument/publishDiagnostics` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_is_unwrapped() {
        let raw = r#"{"clientId":"a","message":{"jsonrpc":"2.0","method":"x"}}"#;
        let inbound = decode_inbound(raw).unwrap();
        assert_eq!(inbound.client_id.as_deref(), Some("a"));
        assert_eq!(inbound.message, json!({"jsonrpc":"2.0","method":"x"}));
    }

    #[test]
    fn bare_message_passes_through() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let inbound = decode_inbound(raw).unwrap();
        assert!(inbound.client_id.is_none());
        assert_eq!(inbound.message["method"], "initialize");
    }

    #[test]
    fn object_missing_message_field_is_not_an_envelope() {
        let raw = r#"{"clientId":"a","method":"x"}"#;
        let inbound = decode_inbound(raw).unwrap();
        assert!(inbound.client_id.is_none());
        assert_eq!(inbound.message["clientId"], "a");
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = decode_inbound("{not json").unwrap_err();
        assert!(matches!(
            err,
            crate::error::TransportError::MalformedMessage(_)
        ));
    }

    #[test]
    fn severity_roundtrip_and_fallback() {
        assert_eq!(DiagnosticSeverity::from(1), DiagnosticSeverity::Error);
        assert_eq!(DiagnosticSeverity::from(4), DiagnosticSeverity::Hint);
        // Out-of-range values degrade to Information.
        assert_eq!(DiagnosticSeverity::from(9), DiagnosticSeverity::Information);
        let d: Diagnostic = serde_json::from_value(json!({
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}},
            "severity": 2,
            "message": "unused element"
        }))
        .unwrap();
        assert_eq!(d.severity, Some(DiagnosticSeverity::Warning));
    }

    #[test]
    fn response_and_notification_shapes() {
        let req = RpcMessage::request(7, "initialize", json!({}));
        assert!(!req.is_response() && !req.is_notification());
        let resp = RpcMessage::response(json!(7), json!({"capabilities": {}}));
        assert!(resp.is_response());
        let note = RpcMessage::notification("initialized", json!({}));
        assert!(note.is_notification());
    }
}
