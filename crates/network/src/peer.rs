//! Known-peer registry and liveness states.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Liveness state of a peer. A peer is ACTIVE while it answered within the
/// ping interval and becomes INACTIVE after staying silent for twice that
/// interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Active,
    Inactive,
    Syncing,
    Validator,
}

impl NodeStatus {
    /// Whether the peer is worth talking to.
    pub fn is_reachable(self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::Validator)
    }
}

/// What this node knows about one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub url: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub block_height: u64,
    pub version: String,
    pub status: NodeStatus,
}

impl NodeRecord {
    fn unknown(url: &str) -> Self {
        Self {
            url: url.to_string(),
            last_seen: None,
            block_height: 0,
            version: String::new(),
            status: NodeStatus::Inactive,
        }
    }
}

/// Registry of known peers behind its own lock. Broadcast paths snapshot
/// and release before doing network I/O.
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, NodeRecord>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a peer URL if it is new. Returns true on first sighting.
    pub fn add(&self, url: &str) -> bool {
        let mut peers = self.peers.write();
        if peers.contains_key(url) {
            return false;
        }
        peers.insert(url.to_string(), NodeRecord::unknown(url));
        true
    }

    pub fn remove(&self, url: &str) {
        self.peers.write().remove(url);
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn get(&self, url: &str) -> Option<NodeRecord> {
        self.peers.read().get(url).cloned()
    }

    /// Every record, copied out.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.peers.read().values().cloned().collect()
    }

    /// URLs of peers currently worth broadcasting to.
    pub fn reachable_urls(&self) -> Vec<String> {
        self.peers
            .read()
            .values()
            .filter(|record| record.status.is_reachable())
            .map(|record| record.url.clone())
            .collect()
    }

    /// Record a successful contact, updating height/version/validator info.
    pub fn record_contact(
        &self,
        url: &str,
        block_height: Option<u64>,
        version: Option<&str>,
        is_validator: bool,
        now: DateTime<Utc>,
    ) {
        let mut peers = self.peers.write();
        let record = peers
            .entry(url.to_string())
            .or_insert_with(|| NodeRecord::unknown(url));
        record.last_seen = Some(now);
        record.status = if is_validator {
            NodeStatus::Validator
        } else {
            NodeStatus::Active
        };
        if let Some(height) = block_height {
            record.block_height = height;
        }
        if let Some(version) = version {
            record.version = version.to_string();
        }
    }

    /// Mark a peer unreachable after a failed send.
    pub fn mark_inactive(&self, url: &str) {
        if let Some(record) = self.peers.write().get_mut(url) {
            record.status = NodeStatus::Inactive;
        }
    }

    /// Demote peers that have been silent for more than twice the ping
    /// interval. Returns how many were demoted.
    pub fn sweep_stale(&self, interval: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - interval * 2;
        let mut demoted = 0;
        for record in self.peers.write().values_mut() {
            if record.status.is_reachable() {
                let stale = match record.last_seen {
                    Some(seen) => seen < cutoff,
                    None => true,
                };
                if stale {
                    record.status = NodeStatus::Inactive;
                    demoted += 1;
                }
            }
        }
        demoted
    }

    /// The reachable peer reporting the greatest height above `min_height`.
    pub fn best_peer(&self, min_height: u64) -> Option<NodeRecord> {
        self.peers
            .read()
            .values()
            .filter(|record| record.status.is_reachable() && record.block_height > min_height)
            .max_by_key(|record| record.block_height)
            .cloned()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
