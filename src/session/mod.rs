// SPDX-License-Identifier: MIT
//! The language-analysis session seam.
//!
//! Real analysis of the modeling language lives outside this crate; the
//! dispatcher consumes it through [`SessionFactory`] / [`AnalysisSession`].
//! One factory call per accepted connection gives every logical client its
//! own session instance — isolation is structural, never access-controlled.

pub mod basic;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::channel::ChannelAdapter;
use crate::error::TransportError;
use crate::protocol::RpcMessage;

/// Outbound handle given to a session at construction. Everything the
/// session emits — responses and server-initiated notifications alike —
/// flows back out through the adapter of the connection that created it.
#[derive(Clone)]
pub struct SessionSender {
    adapter: Arc<ChannelAdapter>,
}

impl SessionSender {
    pub fn new(adapter: Arc<ChannelAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn send(&self, message: &RpcMessage) -> Result<(), TransportError> {
        let value = serde_json::to_value(message)
            .map_err(|e| TransportError::MalformedMessage(e.to_string()))?;
        self.adapter.send(&value).await
    }
}

/// One isolated language-analysis session bound to exactly one connection.
///
/// Messages for one session are handled strictly one at a time, in arrival
/// order; sessions on different connections run as independent tasks.
#[async_trait]
pub trait AnalysisSession: Send {
    /// Handle one inbound message. An error here is logged by the dispatcher
    /// and the session keeps running — one bad message is never fatal to the
    /// connection, let alone to sibling sessions.
    async fn handle_message(&mut self, message: Value) -> anyhow::Result<()>;

    /// Called once when the owning connection closes.
    async fn shutdown(&mut self) {}
}

/// Creates one session per accepted connection.
pub trait SessionFactory: Send + Sync {
    fn create(&self, outbound: SessionSender) -> Box<dyn AnalysisSession>;
}
