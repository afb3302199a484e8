//! Kademlia-style routing table and lookup procedures.

use crate::peer::NodeStatus;
use crate::transport::PeerTransport;
use chrono::{DateTime, Utc};
use cryptochain_core::sha256_bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// 160-bit node identifier: the leading 20 bytes of SHA-256 of the node URL.
pub type NodeId = [u8; 20];

/// Number of buckets (one per possible distance bit length).
pub const BUCKET_COUNT: usize = 160;

/// Maximum entries per bucket.
pub const K: usize = 20;

/// Lookup parallelism.
pub const ALPHA: usize = 3;

/// Derive a node id from its URL.
pub fn node_id_from_url(url: &str) -> NodeId {
    let digest = sha256_bytes(url.as_bytes());
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest[..20]);
    id
}

/// XOR distance between two ids, comparable as a big-endian byte string.
pub fn xor_distance(a: &NodeId, b: &NodeId) -> [u8; 20] {
    let mut out = [0u8; 20];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

/// Number of significant bits in a distance.
fn bit_length(distance: &[u8; 20]) -> u32 {
    for (i, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            return (20 - i) as u32 * 8 - byte.leading_zeros();
        }
    }
    0
}

/// The bucket a remote id falls into: `159 - bitlen(xor)`, clamped into
/// range so the most distant ids share bucket zero. Returns None for the
/// node's own id.
pub fn bucket_index(own: &NodeId, remote: &NodeId) -> Option<usize> {
    let distance = xor_distance(own, remote);
    let bitlen = bit_length(&distance);
    if bitlen == 0 {
        return None;
    }
    Some(159usize.saturating_sub(bitlen as usize))
}

mod node_id_hex {
    use super::NodeId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &NodeId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NodeId, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(&raw).map_err(serde::de::Error::custom)?;
        if bytes.len() != 20 {
            return Err(serde::de::Error::custom("node id must be 20 bytes"));
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(&bytes);
        Ok(id)
    }
}

/// One routing-table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhtNode {
    #[serde(with = "node_id_hex")]
    pub id: NodeId,
    pub url: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub status: NodeStatus,
}

impl DhtNode {
    pub fn from_url(url: &str) -> Self {
        Self {
            id: node_id_from_url(url),
            url: url.to_string(),
            last_seen: None,
            status: NodeStatus::Inactive,
        }
    }
}

/// Outcome of a table insertion attempt.
pub enum InsertOutcome {
    /// The node is ourselves; ignored.
    SelfNode,
    /// The node was already present and moved to the tail.
    Refreshed,
    /// The node was appended to a bucket with room.
    Inserted,
    /// The bucket is full; the caller should ping this least-recently-seen
    /// entry and settle the bucket with `resolve_full`.
    Full { least_recent: DhtNode },
}

/// 160 k-buckets of size K ordered least-recently-seen first. The lock is
/// never held across network I/O; callers snapshot, release, then query.
pub struct RoutingTable {
    own_id: NodeId,
    buckets: RwLock<Vec<Vec<DhtNode>>>,
}

impl RoutingTable {
    pub fn new(own_id: NodeId) -> Self {
        Self {
            own_id,
            buckets: RwLock::new(vec![Vec::new(); BUCKET_COUNT]),
        }
    }

    pub fn own_id(&self) -> NodeId {
        self.own_id
    }

    /// Try to insert a node, moving an existing entry to the tail instead.
    pub fn try_insert(&self, node: DhtNode) -> InsertOutcome {
        let Some(index) = bucket_index(&self.own_id, &node.id) else {
            return InsertOutcome::SelfNode;
        };

        let mut buckets = self.buckets.write();
        let bucket = &mut buckets[index];

        if let Some(pos) = bucket.iter().position(|n| n.id == node.id) {
            let mut existing = bucket.remove(pos);
            existing.last_seen = node.last_seen.or(existing.last_seen);
            existing.status = node.status;
            bucket.push(existing);
            return InsertOutcome::Refreshed;
        }

        if bucket.len() < K {
            bucket.push(node);
            return InsertOutcome::Inserted;
        }

        InsertOutcome::Full {
            least_recent: bucket[0].clone(),
        }
    }

    /// Settle a full bucket after pinging its least-recently-seen entry:
    /// if it answered, keep it (moved to the tail) and drop the newcomer;
    /// otherwise evict it and insert the newcomer.
    pub fn resolve_full(&self, newcomer: DhtNode, least_recent_alive: bool, now: DateTime<Utc>) {
        let Some(index) = bucket_index(&self.own_id, &newcomer.id) else {
            return;
        };

        let mut buckets = self.buckets.write();
        let bucket = &mut buckets[index];
        if bucket.len() < K {
            bucket.push(newcomer);
            return;
        }

        let mut oldest = bucket.remove(0);
        if least_recent_alive {
            oldest.last_seen = Some(now);
            oldest.status = NodeStatus::Active;
            bucket.push(oldest);
        } else {
            bucket.push(newcomer);
        }
    }

    /// Every node currently in the table.
    pub fn all_nodes(&self) -> Vec<DhtNode> {
        self.buckets.read().iter().flatten().cloned().collect()
    }

    /// The number of nodes in the table.
    pub fn len(&self) -> usize {
        self.buckets.read().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The k known nodes closest to a target, by XOR distance.
    pub fn find_closest(&self, target: &NodeId, k: usize) -> Vec<DhtNode> {
        let mut nodes = self.all_nodes();
        nodes.sort_by_key(|node| xor_distance(&node.id, target));
        nodes.truncate(k);
        nodes
    }
}

/// The DHT service: routing table, local key-value store, and the iterative
/// lookup/store/find procedures over the transport.
pub struct Dht {
    node_url: String,
    table: RoutingTable,
    storage: RwLock<HashMap<String, Vec<u8>>>,
    transport: Arc<dyn PeerTransport>,
}

impl Dht {
    pub fn new(node_url: &str, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            node_url: node_url.to_string(),
            table: RoutingTable::new(node_id_from_url(node_url)),
            storage: RwLock::new(HashMap::new()),
            transport,
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn node_id(&self) -> NodeId {
        self.table.own_id()
    }

    /// Insert a node, pinging the least-recently-seen entry when the bucket
    /// is full (the classic Kademlia eviction rule).
    pub async fn add_node(&self, node: DhtNode) {
        match self.table.try_insert(node.clone()) {
            InsertOutcome::Full { least_recent } => {
                let alive = self
                    .transport
                    .find_node(&least_recent.url, &hex::encode(self.node_id()))
                    .await
                    .is_ok();
                self.table.resolve_full(node, alive, Utc::now());
            }
            InsertOutcome::SelfNode | InsertOutcome::Refreshed | InsertOutcome::Inserted => {}
        }
    }

    /// Seed the table from bootstrap URLs and locate our own neighborhood.
    pub async fn bootstrap(&self, urls: &[String]) {
        for url in urls {
            if *url == self.node_url {
                continue;
            }
            self.add_node(DhtNode::from_url(url)).await;
        }
        let own_id = self.node_id();
        self.lookup(&own_id).await;
    }

    /// Iterative node lookup with parallelism ALPHA: query the closest
    /// unasked nodes for their closest nodes, merge, re-sort, and repeat
    /// until no unasked node remains. Returns up to K closest.
    pub async fn lookup(&self, target: &NodeId) -> Vec<DhtNode> {
        let mut shortlist = self.table.find_closest(target, K);
        let mut queried: HashSet<String> = HashSet::new();
        let target_hex = hex::encode(target);

        loop {
            let to_query: Vec<DhtNode> = shortlist
                .iter()
                .filter(|node| !queried.contains(&node.url))
                .take(ALPHA)
                .cloned()
                .collect();
            if to_query.is_empty() {
                break;
            }

            let queries = to_query.iter().map(|node| {
                let transport = Arc::clone(&self.transport);
                let url = node.url.clone();
                let target_hex = target_hex.clone();
                async move { transport.find_node(&url, &target_hex).await }
            });
            let results = futures::future::join_all(queries).await;

            for (node, result) in to_query.iter().zip(results) {
                queried.insert(node.url.clone());
                match result {
                    Ok(found) => {
                        for candidate in found {
                            if candidate.url == self.node_url
                                || shortlist.iter().any(|n| n.id == candidate.id)
                            {
                                continue;
                            }
                            shortlist.push(candidate);
                        }
                    }
                    Err(err) => {
                        tracing::debug!(url = %node.url, %err, "lookup query failed");
                    }
                }
            }

            shortlist.sort_by_key(|node| xor_distance(&node.id, target));
            shortlist.truncate(K);
        }

        shortlist
    }

    /// Store a value on the K nodes closest to the key's id, and locally.
    pub async fn store(&self, key: &str, value: &[u8]) {
        let target = key_id(key);
        let closest = self.lookup(&target).await;

        self.storage
            .write()
            .insert(key.to_string(), value.to_vec());

        let value_hex = hex::encode(value);
        for node in closest {
            if let Err(err) = self.transport.store(&node.url, key, &value_hex).await {
                tracing::debug!(url = %node.url, %err, "remote store failed");
            }
        }
    }

    /// Store a value locally on behalf of a remote peer.
    pub fn store_local(&self, key: &str, value: Vec<u8>) {
        self.storage.write().insert(key.to_string(), value);
    }

    /// Read a locally held value.
    pub fn get_local(&self, key: &str) -> Option<Vec<u8>> {
        self.storage.read().get(key).cloned()
    }

    /// Find a value: local store first, then the closest nodes; hits are
    /// cached locally.
    pub async fn find_value(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(value) = self.get_local(key) {
            return Some(value);
        }

        let target = key_id(key);
        let closest = self.lookup(&target).await;

        for node in closest {
            match self.transport.find_value(&node.url, key).await {
                Ok(reply) if reply.success && reply.found => {
                    let Some(value_hex) = reply.value else {
                        continue;
                    };
                    let Ok(value) = hex::decode(&value_hex) else {
                        tracing::debug!(url = %node.url, "undecodable value from peer");
                        continue;
                    };
                    self.store_local(key, value.clone());
                    return Some(value);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(url = %node.url, %err, "find_value query failed");
                }
            }
        }

        None
    }

    /// Keep buckets alive by looking up a random target.
    pub async fn refresh(&self) {
        let target: NodeId = rand::random();
        let found = self.lookup(&target).await;
        tracing::debug!(found = found.len(), "routing table refreshed");
    }
}

/// Map a storage key to its 160-bit id.
pub fn key_id(key: &str) -> NodeId {
    let digest = sha256_bytes(key.as_bytes());
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest[..20]);
    id
}
