// SPDX-License-Identifier: MIT
//! Remote transport strategy: a WebSocket connection to the language-server
//! endpoint. The provider applies the connection timeout around this.

use async_trait::async_trait;

use super::RemoteConnect;
use crate::channel::{ws, RawChannel};
use crate::error::TransportError;

pub struct WsConnect;

#[async_trait]
impl RemoteConnect for WsConnect {
    async fn connect(&self, endpoint: &str) -> Result<RawChannel, TransportError> {
        ws::connect(endpoint).await
    }
}
