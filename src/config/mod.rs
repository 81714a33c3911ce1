// SPDX-License-Identifier: MIT
//! Host configuration.
//!
//! Priority (highest to lowest):
//!   1. CLI / env — passed as `Some(value)` from clap
//!   2. TOML file (`--config` path, or `modeld.toml` in the working directory)
//!   3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::transport::TransportOptions;

const DEFAULT_PORT: u16 = 4305;
const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 2000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── TransportConfig ─────────────────────────────────────────────────────────

/// Transport failover tuning (`[transport]` in modeld.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Remote language-server endpoint. Default: `ws://127.0.0.1:4305`.
    pub endpoint: String,
    /// Budget for one remote connection attempt. Default: 2000.
    pub connection_timeout_ms: u64,
    /// Remote attempts before falling back to the in-process transport.
    /// Default: 3.
    pub max_reconnect_attempts: u32,
    /// Pause between remote attempts. Default: 0 (immediate retry).
    pub retry_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("ws://127.0.0.1:{DEFAULT_PORT}"),
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            retry_delay_ms: 0,
        }
    }
}

impl TransportConfig {
    pub fn to_options(&self) -> TransportOptions {
        TransportOptions {
            endpoint: self.endpoint.clone(),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

// ─── HostConfig ──────────────────────────────────────────────────────────────

/// Dispatcher host settings (`[host]` in modeld.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Bind address for the WebSocket listener. Use 0.0.0.0 for LAN access.
    pub bind_address: String,
    /// Listener port. Default: 4305.
    pub port: u16,
    /// Log level filter (trace, debug, info, warn, error). Default: info.
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: DEFAULT_PORT,
            log: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub host: HostConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Load from a TOML file, falling back to defaults when the file is
    /// missing. A file that exists but fails to parse is reported and
    /// ignored rather than aborting startup.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::path::PathBuf::from("modeld.toml"),
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        match toml::from_str::<Config>(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "invalid config file — using defaults");
                Self::default()
            }
        }
    }

    /// Apply CLI/env overrides on top of whatever the file provided.
    pub fn with_overrides(
        mut self,
        port: Option<u16>,
        bind_address: Option<String>,
        endpoint: Option<String>,
        log: Option<String>,
    ) -> Self {
        if let Some(port) = port {
            self.host.port = port;
        }
        if let Some(bind) = bind_address {
            self.host.bind_address = bind;
        }
        if let Some(endpoint) = endpoint {
            self.transport.endpoint = endpoint;
        }
        if let Some(log) = log {
            self.host.log = log;
        }
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host.bind_address, self.host.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.host.port, 4305);
        assert_eq!(config.transport.connection_timeout_ms, 2000);
        assert_eq!(config.transport.max_reconnect_attempts, 3);
        assert_eq!(config.transport.retry_delay_ms, 0);
        let options = config.transport.to_options();
        assert_eq!(options.connection_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/modeld.toml")));
        assert_eq!(config.host.port, 4305);
    }

    #[test]
    fn file_values_then_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modeld.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[host]\nport = 5000\n\n[transport]\nmax_reconnect_attempts = 5"
        )
        .unwrap();

        let config = Config::load(Some(&path));
        assert_eq!(config.host.port, 5000);
        assert_eq!(config.transport.max_reconnect_attempts, 5);

        let config = config.with_overrides(
            Some(6000),
            None,
            Some("ws://10.0.0.2:9000".into()),
            Some("debug".into()),
        );
        assert_eq!(config.host.port, 6000);
        assert_eq!(config.host.log, "debug");
        assert_eq!(config.transport.endpoint, "ws://10.0.0.2:9000");
        // Untouched values survive the override pass.
        assert_eq!(config.transport.max_reconnect_attempts, 5);
    }
}
