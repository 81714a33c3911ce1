// SPDX-License-Identifier: MIT
//! Local transport strategy: an in-process analysis host.
//!
//! When the remote endpoint is unreachable, the provider spawns the same
//! dispatcher machinery inside this process — a single-connection host over
//! one half of an in-process channel pair — and hands the other half back as
//! the transport. The session factory is the same seam the network host
//! uses, so failover is invisible above the channel contract.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::LocalSpawn;
use crate::channel::RawChannel;
use crate::dispatcher::serve_channel;
use crate::error::TransportError;
use crate::session::SessionFactory;

const CHANNEL_CAPACITY: usize = 64;

pub struct InProcessHost {
    factory: Arc<dyn SessionFactory>,
}

impl InProcessHost {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl LocalSpawn for InProcessHost {
    async fn spawn(&self) -> Result<RawChannel, TransportError> {
        let (client_end, host_end) = RawChannel::pair(CHANNEL_CAPACITY);
        debug!("spawning in-process analysis host");
        tokio::spawn(serve_channel(host_end, self.factory.clone()));
        Ok(client_end)
    }
}
