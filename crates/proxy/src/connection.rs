//! Downstream Connection Lifecycle
//!
//! Owns one downstream server: connect with bounded retry and backoff,
//! a timeout on every outbound call, and a short-lived capability cache
//! that falls back to the last snapshot when a refetch fails.
//!
//! Concurrent connect attempts collapse into a single cycle. Callers
//! that arrive while a cycle is running wait on it and adopt its
//! outcome instead of starting their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use muxmcp_shared::{ServerCapabilities, ServerConfig};

use crate::client::{AuthStatusHook, DownstreamClient};
use crate::config::EngineConfig;
use crate::error::{ProxyError, ProxyResult};

/// Capacity of the per-connection status channel
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle status of one downstream connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error(String),
}

impl ConnectionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ConnectionStatus::Running)
    }
}

/// Timeout bounds for the call classes; updatable while connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    pub connect: Duration,
    pub capability_fetch: Duration,
    pub call: Duration,
}

impl TimeoutSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            capability_fetch: config.capability_timeout(),
            call: config.call_timeout(),
        }
    }
}

/// Connect retry policy, fixed at construction
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    /// Total attempts, the first try included
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetrySettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_connect_attempts,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }
}

struct CachedCapabilities {
    caps: ServerCapabilities,
    fetched_at: Instant,
}

pub struct DownstreamConnection {
    config: ServerConfig,
    client: Arc<dyn DownstreamClient>,
    timeouts: RwLock<TimeoutSettings>,
    retry: RetrySettings,
    caps_ttl: Duration,
    status: RwLock<ConnectionStatus>,
    status_tx: broadcast::Sender<ConnectionStatus>,
    connect_lock: Mutex<()>,
    /// Bumped once per completed connect cycle so queued callers can
    /// tell a cycle finished while they waited.
    connect_epoch: AtomicU64,
    caps_cache: RwLock<Option<CachedCapabilities>>,
    auth_hook: Option<AuthStatusHook>,
}

impl DownstreamConnection {
    pub fn new(
        config: ServerConfig,
        client: Arc<dyn DownstreamClient>,
        engine: &EngineConfig,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            config,
            client,
            timeouts: RwLock::new(TimeoutSettings::from_config(engine)),
            retry: RetrySettings::from_config(engine),
            caps_ttl: engine.caps_cache_ttl(),
            status: RwLock::new(ConnectionStatus::Stopped),
            status_tx,
            connect_lock: Mutex::new(()),
            connect_epoch: AtomicU64::new(0),
            caps_cache: RwLock::new(None),
            auth_hook: None,
        }
    }

    pub fn with_auth_hook(mut self, hook: AuthStatusHook) -> Self {
        self.auth_hook = Some(hook);
        self
    }

    pub fn server_id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
            .read()
            .map(|status| status.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Every status transition, in order, from subscription onward.
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn timeouts(&self) -> TimeoutSettings {
        self.timeouts
            .read()
            .map(|timeouts| *timeouts)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Replace the timeout bounds. Takes effect on the next call; the
    /// connection itself is left alone.
    pub fn set_timeouts(&self, next: TimeoutSettings) {
        let mut timeouts = self
            .timeouts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *timeouts = next;
    }

    fn set_status(&self, next: ConnectionStatus) {
        {
            let mut status = self
                .status
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *status = next.clone();
        }
        let _ = self.status_tx.send(next);
    }

    /// Establish the connection, retrying transient failures with
    /// jittered exponential backoff. Already running is a no-op.
    pub async fn connect(&self) -> ProxyResult<()> {
        if self.status().is_running() {
            return Ok(());
        }

        let epoch_before = self.connect_epoch.load(Ordering::Acquire);
        let _guard = self.connect_lock.lock().await;

        // A cycle that finished while we queued settles this call too
        if self.status().is_running() {
            return Ok(());
        }
        if self.connect_epoch.load(Ordering::Acquire) != epoch_before {
            if let ConnectionStatus::Error(message) = self.status() {
                return Err(ProxyError::connection(self.config.id.as_str(), message));
            }
        }

        let result = self.run_connect_cycle().await;
        self.connect_epoch.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn run_connect_cycle(&self) -> ProxyResult<()> {
        let strategy = ExponentialBackoff::from_millis(self.retry.base_delay.as_millis() as u64)
            .max_delay(self.retry.max_delay)
            .take(self.retry.max_attempts.saturating_sub(1))
            .map(jitter);

        let outcome = Retry::spawn(strategy, || async {
            self.set_status(ConnectionStatus::Starting);
            match self.try_connect_once().await {
                Ok(()) => {
                    self.set_status(ConnectionStatus::Running);
                    tracing::info!(server_id = %self.config.id, "Connected to downstream server");
                    Ok(Ok(()))
                }
                Err(e) => {
                    self.set_status(ConnectionStatus::Error(e.to_string()));
                    if e.is_transient() {
                        tracing::debug!(
                            server_id = %self.config.id,
                            error = %e,
                            "Connect attempt failed, will retry"
                        );
                        Err(Err(e))
                    } else {
                        tracing::debug!(
                            server_id = %self.config.id,
                            error = %e,
                            "Connect attempt failed, not retryable"
                        );
                        Ok(Err(e))
                    }
                }
            }
        })
        .await
        .unwrap_or_else(|e| e);

        outcome.map_err(|e| {
            tracing::error!(server_id = %self.config.id, error = %e, "Connect attempts exhausted");
            ProxyError::connection(self.config.id.as_str(), e.to_string())
        })
    }

    async fn try_connect_once(&self) -> ProxyResult<()> {
        let bound = self.timeouts().connect;
        match tokio::time::timeout(bound, self.client.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::timeout("connect", bound)),
        }
    }

    /// Tear the connection down. Transport errors are reported but the
    /// connection always ends up `Stopped`.
    pub async fn disconnect(&self) -> ProxyResult<()> {
        if self.status() == ConnectionStatus::Stopped {
            return Ok(());
        }
        self.set_status(ConnectionStatus::Stopping);
        let result = self.client.disconnect().await;
        self.set_status(ConnectionStatus::Stopped);
        if let Err(ref e) = result {
            tracing::warn!(server_id = %self.config.id, error = %e, "Disconnect reported an error");
        }
        result
    }

    async fn ensure_connected(&self) -> ProxyResult<()> {
        if self.status().is_running() {
            Ok(())
        } else {
            self.connect().await
        }
    }

    /// Capability listing for this server. Serves the cached snapshot
    /// while fresh unless `force_refresh` is set; a failed refetch falls
    /// back to the last snapshot of any age rather than erroring.
    pub async fn get_capabilities(&self, force_refresh: bool) -> ProxyResult<ServerCapabilities> {
        if !force_refresh {
            if let Some(caps) = self.fresh_cached_capabilities() {
                tracing::debug!(server_id = %self.config.id, "Serving capabilities from cache");
                return Ok(caps);
            }
        }

        self.ensure_connected().await?;

        let bound = self.timeouts().capability_fetch;
        let fetched = match tokio::time::timeout(bound, self.client.fetch_capabilities()).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::timeout("capabilities/fetch", bound)),
        };

        match fetched {
            Ok(caps) => {
                self.store_capabilities(caps.clone());
                Ok(caps)
            }
            Err(e) => match self.cached_capabilities() {
                Some(stale) => {
                    tracing::warn!(
                        server_id = %self.config.id,
                        error = %e,
                        "Capability fetch failed, serving last cached snapshot"
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Last cached listing regardless of age. No fetch is triggered.
    pub fn cached_capabilities(&self) -> Option<ServerCapabilities> {
        let cache = self.caps_cache.read().ok()?;
        cache.as_ref().map(|entry| entry.caps.clone())
    }

    fn fresh_cached_capabilities(&self) -> Option<ServerCapabilities> {
        let cache = self.caps_cache.read().ok()?;
        let entry = cache.as_ref()?;
        if entry.fetched_at.elapsed() < self.caps_ttl {
            Some(entry.caps.clone())
        } else {
            None
        }
    }

    fn store_capabilities(&self, caps: ServerCapabilities) {
        if let Ok(mut cache) = self.caps_cache.write() {
            *cache = Some(CachedCapabilities {
                caps,
                fetched_at: Instant::now(),
            });
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ProxyResult<Value> {
        self.ensure_connected().await?;
        let bound = self.timeouts().call;
        let result = match tokio::time::timeout(bound, self.client.call_tool(name, arguments)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProxyError::timeout("tools/call", bound)),
        };
        if let Err(ref e) = result {
            self.notify_auth_hook(e);
        }
        result
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> ProxyResult<Value> {
        self.ensure_connected().await?;
        let bound = self.timeouts().call;
        let result =
            match tokio::time::timeout(bound, self.client.get_prompt(name, arguments)).await {
                Ok(result) => result,
                Err(_) => Err(ProxyError::timeout("prompts/get", bound)),
            };
        if let Err(ref e) = result {
            self.notify_auth_hook(e);
        }
        result
    }

    pub async fn read_resource(&self, uri: &str) -> ProxyResult<Value> {
        self.ensure_connected().await?;
        let bound = self.timeouts().call;
        let result = match tokio::time::timeout(bound, self.client.read_resource(uri)).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::timeout("resources/read", bound)),
        };
        if let Err(ref e) = result {
            self.notify_auth_hook(e);
        }
        result
    }

    fn notify_auth_hook(&self, error: &ProxyError) {
        if !matches!(error, ProxyError::Transport(_)) {
            return;
        }
        if let Some(hook) = &self.auth_hook {
            hook(&self.config.id, error);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
