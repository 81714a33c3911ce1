// SPDX-License-Identifier: MIT
//! The transport provider — remote-first failover with local fallback.
//!
//! # State machine
//!
//! ```text
//! {disconnected}
//!    │ connect()
//!    ▼
//! {remote, connecting} ──success──► {remote, connected, attempts: 0}
//!    │ timeout / error
//!    ▼
//! {remote, reconnecting, attempts+1} ──(attempts < budget)──► retry remote
//!    │ budget exhausted
//!    ▼
//! {local, connecting} ──success──► {local, connected, attempts: 0}
//!    │ local construction failed
//!    ▼
//! {disconnected, error, last_error}
//! ```
//!
//! Remote construction is raced against `connection_timeout`; local
//! construction is in-process and gets neither timeout nor retries.
//! `reconnect()` always restarts from the remote attempt, even when
//! currently on local. State is mutated only by this module; consumers read
//! snapshots or subscribe to transitions.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::channel::{ChannelAdapter, RawChannel};
use crate::error::TransportError;
use crate::registry::{dispatch_contained, Registry, Subscription};
use crate::session::SessionFactory;

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Remote,
    Local,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Remote => write!(f, "remote"),
            TransportMode::Local => write!(f, "local"),
            TransportMode::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStatus::Connecting => write!(f, "connecting"),
            TransportStatus::Connected => write!(f, "connected"),
            TransportStatus::Reconnecting => write!(f, "reconnecting"),
            TransportStatus::Disconnected => write!(f, "disconnected"),
            TransportStatus::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the provider's connection state, for UI consumption.
/// `status == Connected` implies `mode != Disconnected`, and
/// `reconnect_attempts` resets to 0 on every transition to `Connected`.
#[derive(Debug, Clone, Serialize)]
pub struct TransportState {
    pub mode: TransportMode,
    pub status: TransportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TransportState {
    fn initial() -> Self {
        Self {
            mode: TransportMode::Disconnected,
            status: TransportStatus::Disconnected,
            endpoint: None,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Remote language-server endpoint.
    pub endpoint: String,
    /// Budget for one remote construction attempt.
    ///
    /// Default: 2000 ms
    pub connection_timeout: Duration,
    /// Remote attempts before falling back to the local transport.
    ///
    /// Default: 3
    pub max_reconnect_attempts: u32,
    /// Pause between remote attempts. Immediate retry by default; raise this
    /// when the remote endpoint rate-limits connection storms.
    ///
    /// Default: 0 ms
    pub retry_delay: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:4305".to_string(),
            connection_timeout: Duration::from_millis(2000),
            max_reconnect_attempts: 3,
            retry_delay: Duration::ZERO,
        }
    }
}

// ─── Construction strategies ─────────────────────────────────────────────────

/// Builds the remote (network) transport. Injected so the failover machine
/// is testable without a listening server.
#[async_trait]
pub trait RemoteConnect: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<RawChannel, TransportError>;
}

/// Builds the locally hosted (in-process) transport.
#[async_trait]
pub trait LocalSpawn: Send + Sync {
    async fn spawn(&self) -> Result<RawChannel, TransportError>;
}

// ─── Provider ────────────────────────────────────────────────────────────────

pub type StateHandler = dyn Fn(&TransportState) + Send + Sync;

pub struct TransportProvider {
    options: TransportOptions,
    remote: Arc<dyn RemoteConnect>,
    local: Arc<dyn LocalSpawn>,
    state: Mutex<TransportState>,
    subscribers: Registry<StateHandler>,
    active: Mutex<Option<Arc<ChannelAdapter>>>,
    /// Serializes connect()/reconnect() so transitions stay ordered.
    connect_lock: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

impl TransportProvider {
    /// Provider with the production strategies: WebSocket remote transport
    /// and an in-process dispatcher hosting `factory` as the local fallback.
    pub fn new(options: TransportOptions, factory: Arc<dyn SessionFactory>) -> Self {
        let remote = Arc::new(remote::WsConnect);
        let local = Arc::new(local::InProcessHost::new(factory));
        Self::with_strategies(options, remote, local)
    }

    pub fn with_strategies(
        options: TransportOptions,
        remote: Arc<dyn RemoteConnect>,
        local: Arc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            options,
            remote,
            local,
            state: Mutex::new(TransportState::initial()),
            subscribers: Registry::new(),
            active: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Current state snapshot. New subscribers do not get a replay of this;
    /// read it here instead.
    pub fn state(&self) -> TransportState {
        self.state.lock().expect("state lock poisoned").clone()
    }

    /// Observe every transition from this moment on, delivered synchronously
    /// in the order they occur.
    pub fn on_state_change(
        &self,
        handler: impl Fn(&TransportState) + Send + Sync + 'static,
    ) -> Subscription<StateHandler> {
        self.subscribers.insert(Arc::new(handler))
    }

    /// Run the failover algorithm and return a connected channel adapter.
    pub async fn connect(&self) -> Result<Arc<ChannelAdapter>, TransportError> {
        let _guard = self.connect_lock.lock().await;
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }

        // A fresh run replaces whatever transport was active before.
        self.teardown_active();

        let timeout_ms = self.options.connection_timeout.as_millis() as u64;
        let mut attempts: u32 = 0;
        let mut last_error: Option<String> = None;

        // Remote attempts, up to the budget.
        loop {
            self.transition(
                TransportMode::Remote,
                TransportStatus::Connecting,
                attempts,
                last_error.clone(),
            );

            let attempt = tokio::time::timeout(
                self.options.connection_timeout,
                self.remote.connect(&self.options.endpoint),
            );
            match attempt.await {
                Ok(Ok(raw)) => {
                    let adapter = ChannelAdapter::new(raw);
                    *self.active.lock().expect("active lock poisoned") = Some(adapter.clone());
                    info!(endpoint = %self.options.endpoint, "remote transport connected");
                    self.transition(TransportMode::Remote, TransportStatus::Connected, 0, None);
                    return Ok(adapter);
                }
                Ok(Err(e)) => {
                    warn!(endpoint = %self.options.endpoint, err = %e, "remote connect failed");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    let e = TransportError::ConnectTimeout(timeout_ms);
                    warn!(endpoint = %self.options.endpoint, err = %e, "remote connect timed out");
                    last_error = Some(e.to_string());
                }
            }

            attempts += 1;
            if attempts >= self.options.max_reconnect_attempts {
                break;
            }
            self.transition(
                TransportMode::Remote,
                TransportStatus::Reconnecting,
                attempts,
                last_error.clone(),
            );
            if !self.options.retry_delay.is_zero() {
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }

        // Budget exhausted — fall back to the locally hosted transport. No
        // timeout or retry here: construction does not cross a network.
        info!(attempts, "remote attempts exhausted — falling back to local transport");
        self.transition(
            TransportMode::Local,
            TransportStatus::Connecting,
            attempts,
            last_error.clone(),
        );
        match self.local.spawn().await {
            Ok(raw) => {
                let adapter = ChannelAdapter::new(raw);
                *self.active.lock().expect("active lock poisoned") = Some(adapter.clone());
                info!("local transport connected");
                self.transition(TransportMode::Local, TransportStatus::Connected, 0, None);
                Ok(adapter)
            }
            Err(e) => {
                warn!(err = %e, "local transport construction failed");
                self.transition(
                    TransportMode::Disconnected,
                    TransportStatus::Error,
                    attempts,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Tear down the current transport and rerun the algorithm, remote
    /// first — even when currently on local.
    pub async fn reconnect(&self) -> Result<Arc<ChannelAdapter>, TransportError> {
        info!("reconnect requested");
        self.connect().await
    }

    /// Tear down the active transport, clear all subscribers, and go quiet.
    /// No further transitions are emitted.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown_active();
        self.subscribers.clear();
        let mut state = self.state.lock().expect("state lock poisoned");
        *state = TransportState::initial();
    }

    fn teardown_active(&self) {
        if let Some(adapter) = self.active.lock().expect("active lock poisoned").take() {
            adapter.close();
        }
    }

    fn transition(
        &self,
        mode: TransportMode,
        status: TransportStatus,
        reconnect_attempts: u32,
        last_error: Option<String>,
    ) {
        let snapshot = {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.mode = mode;
            state.status = status;
            state.endpoint = match mode {
                TransportMode::Remote => Some(self.options.endpoint.clone()),
                _ => None,
            };
            state.reconnect_attempts = reconnect_attempts;
            state.last_error = last_error;
            state.clone()
        };
        tracing::debug!(mode = %snapshot.mode, status = %snapshot.status,
            attempts = snapshot.reconnect_attempts, "transport state change");
        for handler in self.subscribers.snapshot() {
            dispatch_contained(|| handler(&snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Remote stub: a fixed schedule of outcomes per attempt.
    enum Outcome {
        Ok,
        Fail,
        Hang,
    }

    struct ScriptedRemote {
        script: Vec<Outcome>,
        calls: AtomicUsize,
    }

    impl ScriptedRemote {
        fn new(script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RemoteConnect for ScriptedRemote {
        async fn connect(&self, _endpoint: &str) -> Result<RawChannel, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(call).unwrap_or(&Outcome::Fail) {
                Outcome::Ok => {
                    let (ours, _theirs) = RawChannel::pair(4);
                    Ok(ours)
                }
                Outcome::Fail => Err(TransportError::ConnectFailed("refused".into())),
                Outcome::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct StubLocal {
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubLocal {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl LocalSpawn for StubLocal {
        async fn spawn(&self) -> Result<RawChannel, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::ConnectFailed("local spawn failed".into()));
            }
            let (ours, _theirs) = RawChannel::pair(4);
            Ok(ours)
        }
    }

    fn fast_options() -> TransportOptions {
        TransportOptions {
            endpoint: "ws://test.invalid:1".into(),
            connection_timeout: Duration::from_millis(20),
            max_reconnect_attempts: 3,
            retry_delay: Duration::ZERO,
        }
    }

    fn record_states(provider: &TransportProvider) -> Arc<Mutex<Vec<TransportState>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let states2 = states.clone();
        // Dropping the subscription does not dispose it — the handler stays
        // registered for the provider's lifetime.
        let _ = provider.on_state_change(move |s| {
            states2.lock().unwrap().push(s.clone());
        });
        states
    }

    #[tokio::test]
    async fn immediate_remote_success() {
        let remote = ScriptedRemote::new(vec![Outcome::Ok]);
        let local = StubLocal::new(false);
        let provider =
            TransportProvider::with_strategies(fast_options(), remote.clone(), local.clone());

        let adapter = provider.connect().await.unwrap();
        assert!(adapter.is_connected());

        let state = provider.state();
        assert_eq!(state.mode, TransportMode::Remote);
        assert_eq!(state.status, TransportStatus::Connected);
        assert_eq!(state.reconnect_attempts, 0);
        // The local transport was never constructed.
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hanging_remote_falls_back_to_local() {
        let remote = ScriptedRemote::new(vec![Outcome::Hang, Outcome::Hang, Outcome::Hang]);
        let local = StubLocal::new(false);
        let provider =
            TransportProvider::with_strategies(fast_options(), remote.clone(), local.clone());
        let states = record_states(&provider);

        provider.connect().await.unwrap();

        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);

        let states = states.lock().unwrap();
        let first = states.first().unwrap();
        assert_eq!(
            (first.mode, first.status),
            (TransportMode::Remote, TransportStatus::Connecting)
        );
        // The transition just before local success carries the full budget.
        let local_connecting = states
            .iter()
            .find(|s| s.mode == TransportMode::Local && s.status == TransportStatus::Connecting)
            .unwrap();
        assert_eq!(local_connecting.reconnect_attempts, 3);
        let last = states.last().unwrap();
        assert_eq!(
            (last.mode, last.status, last.reconnect_attempts),
            (TransportMode::Local, TransportStatus::Connected, 0)
        );
    }

    #[tokio::test]
    async fn transient_remote_failure_self_heals() {
        // Attempt 1 fails fast, attempt 2 succeeds — no fallback needed.
        let remote = ScriptedRemote::new(vec![Outcome::Fail, Outcome::Ok]);
        let local = StubLocal::new(false);
        let provider =
            TransportProvider::with_strategies(fast_options(), remote.clone(), local.clone());

        provider.connect().await.unwrap();
        let state = provider.state();
        assert_eq!(state.mode, TransportMode::Remote);
        assert_eq!(state.status, TransportStatus::Connected);
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reconnect_from_local_tries_remote_first() {
        // First run: remote always fails → local. Then remote recovers.
        let remote = ScriptedRemote::new(vec![
            Outcome::Fail,
            Outcome::Fail,
            Outcome::Fail,
            Outcome::Ok,
        ]);
        let local = StubLocal::new(false);
        let provider =
            TransportProvider::with_strategies(fast_options(), remote.clone(), local.clone());

        provider.connect().await.unwrap();
        assert_eq!(provider.state().mode, TransportMode::Local);

        provider.reconnect().await.unwrap();
        let state = provider.state();
        assert_eq!(state.mode, TransportMode::Remote);
        assert_eq!(state.status, TransportStatus::Connected);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn local_failure_is_terminal_for_the_attempt() {
        let remote = ScriptedRemote::new(vec![Outcome::Fail, Outcome::Fail, Outcome::Fail]);
        let local = StubLocal::new(true);
        let provider = TransportProvider::with_strategies(fast_options(), remote, local);

        let err = provider.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed(_)));
        let state = provider.state();
        assert_eq!(state.mode, TransportMode::Disconnected);
        assert_eq!(state.status, TransportStatus::Error);
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn dispose_silences_subscribers_and_blocks_connect() {
        let remote = ScriptedRemote::new(vec![Outcome::Ok, Outcome::Ok]);
        let local = StubLocal::new(false);
        let provider = TransportProvider::with_strategies(fast_options(), remote, local);
        let states = record_states(&provider);

        provider.connect().await.unwrap();
        let seen_before = states.lock().unwrap().len();

        provider.dispose();
        assert!(provider.connect().await.is_err());
        // No transitions delivered after dispose.
        assert_eq!(states.lock().unwrap().len(), seen_before);
        assert_eq!(provider.state().status, TransportStatus::Disconnected);
    }
}
