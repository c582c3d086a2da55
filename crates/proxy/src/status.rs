//! Server Status Tracking
//!
//! Last known refresh status per server plus a broadcast stream of
//! transitions for UI consumers. The tracker is the single writer of
//! status; everything else observes.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use muxmcp_shared::{ServerConnectionStatus, ServerConnectionUpdate};

/// Capacity of the update channel. Consumers that fall further behind
/// observe a lag error and skip ahead to the live edge.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

struct StatusEntry {
    status: ServerConnectionStatus,
    error: Option<String>,
    /// Set when the entry first enters `Connecting`, kept across
    /// repeated `Connecting` writes so elapsed time stays meaningful.
    connecting_since: Option<Instant>,
}

pub struct ServerStatusTracker {
    entries: RwLock<HashMap<String, StatusEntry>>,
    update_tx: broadcast::Sender<ServerConnectionUpdate>,
}

impl ServerStatusTracker {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            update_tx,
        }
    }

    /// Record a status for one server and broadcast the transition.
    pub fn set(&self, server_id: &str, status: ServerConnectionStatus, error: Option<String>) {
        let update = {
            let Ok(mut entries) = self.entries.write() else {
                return;
            };
            Self::apply(&mut entries, server_id, status, error)
        };
        let _ = self.update_tx.send(update);
    }

    /// Record the same status for many servers under one lock pass, then
    /// broadcast one transition per server.
    pub fn set_all(&self, server_ids: &[String], status: ServerConnectionStatus) {
        let updates: Vec<ServerConnectionUpdate> = {
            let Ok(mut entries) = self.entries.write() else {
                return;
            };
            server_ids
                .iter()
                .map(|server_id| Self::apply(&mut entries, server_id, status, None))
                .collect()
        };
        for update in updates {
            let _ = self.update_tx.send(update);
        }
    }

    fn apply(
        entries: &mut HashMap<String, StatusEntry>,
        server_id: &str,
        status: ServerConnectionStatus,
        error: Option<String>,
    ) -> ServerConnectionUpdate {
        let entry = entries
            .entry(server_id.to_string())
            .or_insert_with(|| StatusEntry {
                status,
                error: None,
                connecting_since: None,
            });

        entry.connecting_since = if status == ServerConnectionStatus::Connecting {
            entry.connecting_since.or_else(|| Some(Instant::now()))
        } else {
            None
        };
        entry.status = status;
        entry.error = error.clone();

        ServerConnectionUpdate {
            server_id: server_id.to_string(),
            status,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn remove(&self, server_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(server_id);
        }
    }

    /// Drop every entry whose server id is not in `valid_ids`.
    pub fn retain(&self, valid_ids: &HashSet<String>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|server_id, _| valid_ids.contains(server_id));
        }
    }

    pub fn status_for(&self, server_id: &str) -> Option<ServerConnectionStatus> {
        let entries = self.entries.read().ok()?;
        entries.get(server_id).map(|entry| entry.status)
    }

    pub fn last_error(&self, server_id: &str) -> Option<String> {
        let entries = self.entries.read().ok()?;
        entries.get(server_id).and_then(|entry| entry.error.clone())
    }

    /// When the server entered its current `Connecting` phase, if it is
    /// in one.
    pub fn connecting_since(&self, server_id: &str) -> Option<Instant> {
        let entries = self.entries.read().ok()?;
        entries.get(server_id).and_then(|entry| entry.connecting_since)
    }

    /// Raw broadcast receiver of status transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerConnectionUpdate> {
        self.update_tx.subscribe()
    }

    /// Transition stream for `Stream`-based consumers, e.g. SSE bridges.
    pub fn update_stream(&self) -> BroadcastStream<ServerConnectionUpdate> {
        BroadcastStream::new(self.update_tx.subscribe())
    }
}

impl Default for ServerStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
