// SPDX-License-Identifier: MIT
//! modeld — transport and session layer for the modeling-language server.
//!
//! Three layers, bottom to top:
//!
//! - [`channel`]: raw text channels (WebSocket or in-process) and the
//!   [`channel::ChannelAdapter`] that decodes envelopes and fans messages
//!   out to subscribers.
//! - [`transport`]: the remote-first failover provider — try the configured
//!   WebSocket endpoint, fall back to an in-process host when it is
//!   unreachable.
//! - [`client`]: the LSP client service — initialize handshake, request/id
//!   correlation, diagnostics republish, per-document plugins.
//!
//! The server side lives in [`dispatcher`]: one [`session::AnalysisSession`]
//! per connection, created by a [`session::SessionFactory`].

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use channel::ChannelAdapter;
pub use client::LspClientService;
pub use config::Config;
pub use dispatcher::{HostingMode, SessionDispatcher};
pub use error::TransportError;
pub use registry::{Registry, Subscription};
pub use transport::{TransportOptions, TransportProvider, TransportState};
