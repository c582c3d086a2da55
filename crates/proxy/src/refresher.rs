//! Background Capability Refresh
//!
//! Keeps the snapshot cache and status tracker current for every
//! enabled server. Refreshes run on a periodic loop and on demand;
//! each in-flight fetch carries a cancellation token so disabling or
//! removing a server aborts its fetch promptly instead of letting a
//! doomed result land.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use muxmcp_shared::{ServerCapsSnapshot, ServerConfig, ServerConnectionStatus};

use crate::cache::CapabilityCache;
use crate::client::CapabilityFetcher;
use crate::config::EngineConfig;
use crate::error::{ProxyError, ProxyResult, TargetKind};
use crate::status::ServerStatusTracker;

/// Receives a nudge whenever cached snapshots or statuses changed and
/// consumers should re-read them.
pub trait SnapshotListener: Send + Sync {
    fn snapshots_updated(&self);
}

struct InflightFetch {
    generation: u64,
    token: CancellationToken,
}

pub struct CapabilityRefresher {
    fetcher: CapabilityFetcher,
    cache: Arc<CapabilityCache>,
    status: Arc<ServerStatusTracker>,
    roster: RwLock<HashMap<String, ServerConfig>>,
    inflight: RwLock<HashMap<String, InflightFetch>>,
    next_generation: AtomicU64,
    job: Mutex<Option<CancellationToken>>,
    listener: Option<Arc<dyn SnapshotListener>>,
    refresh_interval: Duration,
    fetch_timeout: Duration,
}

impl CapabilityRefresher {
    pub fn new(
        fetcher: CapabilityFetcher,
        cache: Arc<CapabilityCache>,
        status: Arc<ServerStatusTracker>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            fetcher,
            cache,
            status,
            roster: RwLock::new(HashMap::new()),
            inflight: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            job: Mutex::new(None),
            listener: None,
            refresh_interval: config.refresh_interval(),
            fetch_timeout: config.capability_timeout(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn SnapshotListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Replace the known server roster. Cache and status entries for
    /// servers no longer present are dropped and their in-flight
    /// fetches cancelled.
    pub fn sync_with_servers(&self, configs: &[ServerConfig]) {
        let valid: HashSet<String> = configs.iter().map(|c| c.id.clone()).collect();

        if let Ok(mut roster) = self.roster.write() {
            roster.clear();
            for config in configs {
                roster.insert(config.id.clone(), config.clone());
            }
        }

        if let Ok(mut inflight) = self.inflight.write() {
            inflight.retain(|server_id, fetch| {
                let keep = valid.contains(server_id);
                if !keep {
                    fetch.token.cancel();
                }
                keep
            });
        }

        self.cache.retain(&valid);
        self.status.retain(&valid);
        info!(server_count = configs.len(), "Synced refresher roster");
    }

    /// Refresh every enabled server whose snapshot is due. `force`
    /// ignores freshness and refetches everything enabled.
    pub async fn refresh_enabled_servers(&self, force: bool) {
        let due = self.due_servers(None, force);
        self.refresh_batch(due).await;
    }

    /// Refresh a specific set of servers, still honoring the enabled
    /// flag and, unless forced, snapshot freshness.
    pub async fn refresh_servers_by_id(&self, server_ids: &[String], force: bool) {
        let only: HashSet<&str> = server_ids.iter().map(String::as_str).collect();
        let due = self.due_servers(Some(&only), force);
        self.refresh_batch(due).await;
    }

    fn due_servers(&self, only: Option<&HashSet<&str>>, force: bool) -> Vec<ServerConfig> {
        let Ok(roster) = self.roster.read() else {
            return Vec::new();
        };
        let mut due: Vec<ServerConfig> = roster
            .values()
            .filter(|c| c.enabled)
            .filter(|c| only.map_or(true, |ids| ids.contains(c.id.as_str())))
            .filter(|c| force || self.cache.should_refresh(&c.id, self.refresh_interval))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.id.cmp(&b.id));
        due
    }

    async fn refresh_batch(&self, due: Vec<ServerConfig>) {
        if due.is_empty() {
            debug!("No servers due for refresh");
            return;
        }

        let ids: Vec<String> = due.iter().map(|c| c.id.clone()).collect();
        self.status.set_all(&ids, ServerConnectionStatus::Connecting);
        self.publish();

        info!(server_count = due.len(), "Refreshing server capabilities");
        join_all(due.iter().map(|config| self.refresh_server(config))).await;
        self.publish();
    }

    /// Fetch one server's listing and settle its cache and status.
    /// Returns the fetch error, if any, for callers that need it.
    async fn refresh_server(&self, config: &ServerConfig) -> Option<ProxyError> {
        let token = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut inflight) = self.inflight.write() {
            let previous = inflight.insert(
                config.id.clone(),
                InflightFetch {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.token.cancel();
            }
        }

        let fetch = (self.fetcher)(config.clone(), self.fetch_timeout);
        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            result = fetch => Some(result),
        };

        if let Ok(mut inflight) = self.inflight.write() {
            // Only clear the slot if a newer fetch has not replaced it
            let ours = inflight
                .get(&config.id)
                .map_or(false, |fetch| fetch.generation == generation);
            if ours {
                inflight.remove(&config.id);
            }
        }

        match outcome {
            None => {
                debug!(server_id = %config.id, "Capability refresh cancelled");
                None
            }
            Some(Ok(caps)) => {
                let snapshot = ServerCapsSnapshot::from_capabilities(
                    config.id.as_str(),
                    config.name.as_str(),
                    &caps,
                );
                debug!(
                    server_id = %config.id,
                    tool_count = snapshot.tool_count(),
                    "Refreshed server capabilities"
                );
                self.cache.put(snapshot);
                self.settle_status(&config.id, None);
                None
            }
            Some(Err(e)) => {
                warn!(server_id = %config.id, error = %e, "Capability fetch failed");
                self.settle_status(&config.id, Some(&e));
                Some(e)
            }
        }
    }

    /// Status after a fetch settles: disabled wins, then a usable
    /// snapshot of any age counts as available, otherwise error.
    fn settle_status(&self, server_id: &str, error: Option<&ProxyError>) {
        if !self.is_enabled(server_id) {
            self.status
                .set(server_id, ServerConnectionStatus::Disabled, None);
        } else if self.cache.has(server_id) {
            self.status
                .set(server_id, ServerConnectionStatus::Available, None);
        } else {
            self.status.set(
                server_id,
                ServerConnectionStatus::Error,
                error.map(|e| e.to_string()),
            );
        }
    }

    fn is_enabled(&self, server_id: &str) -> bool {
        self.roster
            .read()
            .ok()
            .map_or(false, |roster| {
                roster.get(server_id).map_or(false, |c| c.enabled)
            })
    }

    /// Snapshot for one server: cached if present, otherwise (or when
    /// forced) fetched on the spot.
    pub async fn get_server_caps(
        &self,
        server_id: &str,
        force_refresh: bool,
    ) -> ProxyResult<ServerCapsSnapshot> {
        if !force_refresh {
            if let Some(snapshot) = self.cache.snapshot(server_id) {
                return Ok(snapshot);
            }
        }

        let config = self
            .roster
            .read()
            .ok()
            .and_then(|roster| roster.get(server_id).cloned())
            .ok_or_else(|| ProxyError::unknown(TargetKind::Server, server_id))?;

        self.status
            .set(server_id, ServerConnectionStatus::Connecting, None);
        self.publish();
        let fetch_error = self.refresh_server(&config).await;
        self.publish();

        match self.cache.snapshot(server_id) {
            Some(snapshot) => Ok(snapshot),
            None => Err(fetch_error
                .unwrap_or_else(|| ProxyError::unknown(TargetKind::Server, server_id))),
        }
    }

    /// Mark a server disabled: cancel its in-flight fetch, drop its
    /// snapshot, and report `Disabled`.
    pub fn mark_server_disabled(&self, server_id: &str) {
        if let Ok(mut inflight) = self.inflight.write() {
            if let Some(fetch) = inflight.remove(server_id) {
                fetch.token.cancel();
            }
        }
        if let Ok(mut roster) = self.roster.write() {
            if let Some(config) = roster.get_mut(server_id) {
                config.enabled = false;
            }
        }
        self.cache.remove(server_id);
        self.status
            .set(server_id, ServerConnectionStatus::Disabled, None);
        self.publish();
        info!(server_id = %server_id, "Server disabled");
    }

    /// Forget a server entirely.
    pub fn mark_server_removed(&self, server_id: &str) {
        if let Ok(mut inflight) = self.inflight.write() {
            if let Some(fetch) = inflight.remove(server_id) {
                fetch.token.cancel();
            }
        }
        if let Ok(mut roster) = self.roster.write() {
            roster.remove(server_id);
        }
        self.cache.remove(server_id);
        self.status.remove(server_id);
        self.publish();
        info!(server_id = %server_id, "Server removed");
    }

    /// Cached snapshots for every enabled server, in server id order.
    pub fn list_enabled_server_caps(&self) -> Vec<ServerCapsSnapshot> {
        let mut ids: Vec<String> = self
            .roster
            .read()
            .map(|roster| {
                roster
                    .values()
                    .filter(|c| c.enabled)
                    .map(|c| c.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        self.cache.list(&ids)
    }

    fn publish(&self) {
        if let Some(listener) = &self.listener {
            listener.snapshots_updated();
        }
    }

    /// Restart the periodic refresh loop, cancelling any previous one.
    /// With `enabled` false the loop is just stopped.
    pub async fn restart_background_job(self: Arc<Self>, enabled: bool) {
        let mut slot = self.job.lock().await;
        if let Some(previous) = slot.take() {
            previous.cancel();
            debug!("Cancelled previous refresh loop");
        }
        if !enabled {
            info!("Background capability refresh disabled");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = self.refresh_interval;
        let refresher = Arc::clone(&self);
        tokio::spawn(async move {
            info!(
                interval_ms = interval.as_millis() as u64,
                "Capability refresh loop started"
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                refresher.refresh_enabled_servers(false).await;
            }
            debug!("Capability refresh loop stopped");
        });
        *slot = Some(cancel);
    }

    /// Stop the periodic refresh loop if one is running.
    pub async fn stop_background_job(&self) {
        let mut slot = self.job.lock().await;
        if let Some(job) = slot.take() {
            job.cancel();
            info!("Stopped capability refresh loop");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
