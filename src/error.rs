// SPDX-License-Identifier: MIT
//! Error taxonomy for the transport and session layer.
//!
//! Every failure that crosses a public API boundary in this crate is one of
//! these variants. Per-message problems (`MalformedMessage`) are recovered
//! locally — reported through the owning adapter's error registry and dropped,
//! never fatal to the reader loop. Connection-level problems surface to the
//! caller of `connect()` / `reconnect()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation attempted after the channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The underlying raw channel reported a transport-level error. The
    /// owning adapter closes itself after reporting this.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// Remote transport construction exceeded the configured connection timeout.
    #[error("remote connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// Remote or local transport construction failed outright.
    #[error("transport construction failed: {0}")]
    ConnectFailed(String),

    /// Protocol operation attempted before the initialize handshake completed.
    #[error("client not initialized — call connect() first")]
    NotInitialized,

    /// Inbound payload shape could not be decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl TransportError {
    /// Wrap an arbitrary construction error, preserving its display chain.
    pub fn connect_failed(err: impl std::fmt::Display) -> Self {
        TransportError::ConnectFailed(err.to_string())
    }
}
