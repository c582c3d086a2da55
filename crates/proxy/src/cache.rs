//! Capability Snapshot Cache
//!
//! Thread-safe store of the last known capability snapshot per server,
//! keyed by server id. Entries carry their fetch time so callers can
//! ask whether a refresh is due without fetching.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use muxmcp_shared::ServerCapsSnapshot;

struct CacheEntry {
    snapshot: ServerCapsSnapshot,
    fetched_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
}

pub struct CapabilityCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store a snapshot, replacing any previous entry for the server.
    pub fn put(&self, snapshot: ServerCapsSnapshot) {
        if let Ok(mut entries) = self.entries.write() {
            tracing::debug!(
                server_id = %snapshot.server_id,
                tool_count = snapshot.tool_count(),
                "Cached capability snapshot"
            );
            entries.insert(
                snapshot.server_id.clone(),
                CacheEntry {
                    snapshot,
                    fetched_at: Instant::now(),
                },
            );
        }
    }

    pub fn snapshot(&self, server_id: &str) -> Option<ServerCapsSnapshot> {
        let entries = self.entries.read().ok()?;
        entries.get(server_id).map(|entry| entry.snapshot.clone())
    }

    pub fn has(&self, server_id: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(server_id))
            .unwrap_or(false)
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

    /// Rewrite the display name on an existing entry, e.g. after the
    /// server was renamed. Missing entries are left alone.
    pub fn update_name(&self, server_id: &str, name: &str) {
        if let Ok(mut entries) = self.entries.write() {
            if let Some(entry) = entries.get_mut(server_id) {
                entry.snapshot.server_name = name.to_string();
            }
        }
    }

    /// True when no entry exists or the entry is older than `interval`.
    pub fn should_refresh(&self, server_id: &str, interval: Duration) -> bool {
        self.entries
            .read()
            .map(|entries| match entries.get(server_id) {
                Some(entry) => entry.fetched_at.elapsed() >= interval,
                None => true,
            })
            .unwrap_or(true)
    }

    /// Snapshots for the given ids, in the given order. Ids with no
    /// cached entry are skipped.
    pub fn list(&self, server_ids: &[String]) -> Vec<ServerCapsSnapshot> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        server_ids
            .iter()
            .filter_map(|server_id| entries.get(server_id))
            .map(|entry| entry.snapshot.clone())
            .collect()
    }

    /// Count entries fresh and stale against the given staleness bound.
    pub fn stats(&self, staleness: Duration) -> CacheStats {
        let Ok(entries) = self.entries.read() else {
            return CacheStats {
                total_entries: 0,
                fresh_entries: 0,
                stale_entries: 0,
            };
        };
        let total_entries = entries.len();
        let stale_entries = entries
            .values()
            .filter(|entry| entry.fetched_at.elapsed() >= staleness)
            .count();
        CacheStats {
            total_entries,
            fresh_entries: total_entries - stale_entries,
            stale_entries,
        }
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
