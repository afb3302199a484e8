//! Gossip, block propagation, and chain synchronization.

use crate::message::{BlockRequestPayload, Message, MessageType, NodeInfoPayload};
use crate::peer::PeerRegistry;
use crate::transport::PeerTransport;
use chrono::Utc;
use cryptochain_chain::{Blockchain, ChainError};
use cryptochain_core::{Block, Transaction};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Networking configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// This node's advertised URL, also its identity on the wire.
    pub node_url: String,
    /// Software version advertised in NODE_INFO.
    pub version: String,
    /// Whether this node advertises the validator flag.
    pub is_validator: bool,
    /// Interval between discovery pings.
    pub ping_interval: Duration,
    /// Interval between sync attempts.
    pub sync_interval: Duration,
}

impl NetworkConfig {
    pub fn new(node_url: &str) -> Self {
        Self {
            node_url: node_url.to_string(),
            version: "1.0.0".to_string(),
            is_validator: false,
            ping_interval: Duration::from_secs(30),
            sync_interval: Duration::from_secs(30),
        }
    }
}

/// Drives gossip with known peers and keeps the local chain in sync.
pub struct PeerManager {
    config: NetworkConfig,
    chain: Arc<Blockchain>,
    peers: PeerRegistry,
    transport: Arc<dyn PeerTransport>,
    /// Blocks that arrived ahead of the local tip, waiting for their
    /// predecessors.
    pending_blocks: Mutex<Vec<Block>>,
    /// Single-flight guard: at most one sync runs at a time.
    syncing: AtomicBool,
}

impl PeerManager {
    pub fn new(
        config: NetworkConfig,
        chain: Arc<Blockchain>,
        transport: Arc<dyn PeerTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            chain,
            peers: PeerRegistry::new(),
            transport,
            pending_blocks: Mutex::new(Vec::new()),
            syncing: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    /// This node's own NODE_INFO payload.
    pub fn node_info(&self) -> NodeInfoPayload {
        NodeInfoPayload {
            node_url: self.config.node_url.clone(),
            block_height: self.chain.height(),
            version: self.config.version.clone(),
            is_validator: self.config.is_validator,
        }
    }

    /// Register a peer URL. Never registers ourselves.
    pub fn add_peer(&self, url: &str) -> bool {
        if url == self.config.node_url {
            return false;
        }
        self.peers.add(url)
    }

    /// Ping one peer and fold its NODE_INFO reply into the registry.
    pub async fn ping_peer(&self, url: &str) {
        let message = Message::ping(&self.node_info(), &self.config.node_url);
        match self.transport.send(url, &message).await {
            Ok(Some(reply)) if reply.msg_type == MessageType::NodeInfo => {
                if let Ok(info) = serde_json::from_value::<NodeInfoPayload>(reply.payload) {
                    self.peers.record_contact(
                        &info.node_url,
                        Some(info.block_height),
                        Some(&info.version),
                        info.is_validator,
                        Utc::now(),
                    );
                }
            }
            Ok(_) => {
                self.peers
                    .record_contact(url, None, None, false, Utc::now());
            }
            Err(err) => {
                tracing::debug!(url, %err, "ping failed");
                self.peers.mark_inactive(url);
            }
        }
    }

    /// Ping every known peer concurrently, then demote the silent ones.
    pub async fn ping_all(&self) {
        let urls: Vec<String> = self
            .peers
            .snapshot()
            .into_iter()
            .map(|record| record.url)
            .collect();
        futures::future::join_all(urls.iter().map(|url| self.ping_peer(url))).await;
        self.peers.sweep_stale(
            chrono::Duration::from_std(self.config.ping_interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
            Utc::now(),
        );
    }

    /// Ask a peer for its peer list and register the new ones.
    pub async fn request_peers(&self, url: &str) {
        let message = Message::peers_list(&[], &self.config.node_url);
        match self.transport.send(url, &message).await {
            Ok(Some(reply)) if reply.msg_type == MessageType::PeersList => {
                if let Ok(peers) = serde_json::from_value::<Vec<String>>(reply.payload) {
                    for peer in peers {
                        self.add_peer(&peer);
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(url, %err, "peer list request failed");
                self.peers.mark_inactive(url);
            }
        }
    }

    /// Fan a mined block out to every reachable peer, fire-and-forget.
    pub fn broadcast_block(self: &Arc<Self>, block: &Block) {
        let message = Message::block(block, &self.config.node_url);
        self.broadcast(message);
        tracing::debug!(index = block.index, "block broadcast queued");
    }

    /// Fan an admitted transaction out to every reachable peer.
    pub fn broadcast_transaction(self: &Arc<Self>, tx: &Transaction) {
        let message = Message::transaction(tx, &self.config.node_url);
        self.broadcast(message);
    }

    fn broadcast(self: &Arc<Self>, message: Message) {
        // Snapshot under the lock, release, then send
        let urls = self.peers.reachable_urls();
        for url in urls {
            let manager = Arc::clone(self);
            let message = message.clone();
            tokio::spawn(async move {
                if let Err(err) = manager.transport.send(&url, &message).await {
                    tracing::debug!(url, %err, "broadcast send failed");
                    manager.peers.mark_inactive(&url);
                }
            });
        }
    }

    /// Dispatch one incoming envelope, returning the reply envelope when the
    /// message type calls for one.
    pub fn handle_message(self: &Arc<Self>, message: Message) -> Option<Message> {
        let sender = message.sender.clone();
        match message.msg_type {
            MessageType::Block => {
                match serde_json::from_value::<Block>(message.payload) {
                    Ok(block) => self.handle_block(block, &sender),
                    Err(err) => tracing::debug!(%err, "undecodable block payload"),
                }
                None
            }
            MessageType::Transaction => {
                match serde_json::from_value::<Transaction>(message.payload) {
                    Ok(tx) => self.handle_transaction(tx, &sender),
                    Err(err) => tracing::debug!(%err, "undecodable transaction payload"),
                }
                None
            }
            MessageType::NodeInfo => {
                if let Ok(info) = serde_json::from_value::<NodeInfoPayload>(message.payload) {
                    self.peers.record_contact(
                        &info.node_url,
                        Some(info.block_height),
                        Some(&info.version),
                        info.is_validator,
                        Utc::now(),
                    );
                }
                None
            }
            MessageType::BlockRequest => {
                let request: BlockRequestPayload =
                    serde_json::from_value(message.payload).ok()?;
                self.peers.record_contact(&sender, None, None, false, Utc::now());
                self.chain
                    .block_by_index(request.height)
                    .map(|block| Message::block(&block, &self.config.node_url))
            }
            MessageType::PeersList => {
                let mut peers: Vec<String> = self
                    .peers
                    .reachable_urls()
                    .into_iter()
                    .filter(|url| *url != sender)
                    .collect();
                peers.push(self.config.node_url.clone());
                Some(Message::peers_list(&peers, &self.config.node_url))
            }
            MessageType::Ping => {
                if let Ok(info) = serde_json::from_value::<NodeInfoPayload>(message.payload) {
                    self.peers.record_contact(
                        &info.node_url,
                        Some(info.block_height),
                        Some(&info.version),
                        info.is_validator,
                        Utc::now(),
                    );
                }
                Some(Message::node_info(&self.node_info(), &self.config.node_url))
            }
        }
    }

    /// Apply a gossiped block per the tip-extension rule: known hashes are
    /// dropped, direct successors are appended (then any buffered follow-ups
    /// drained), blocks from the future are buffered behind a sync, and
    /// stale indices are ignored.
    fn handle_block(self: &Arc<Self>, block: Block, sender: &str) {
        if self.chain.block_by_hash(&block.hash).is_some() {
            tracing::debug!(index = block.index, "block already known");
            return;
        }

        let block_index = block.index;
        let local_height = self.chain.height();

        if block_index > local_height + 1 {
            tracing::debug!(
                index = block_index,
                local_height,
                "block ahead of tip, buffering and syncing"
            );
            self.pending_blocks.lock().push(block);
            self.peers
                .record_contact(sender, Some(block_index), None, false, Utc::now());
            let manager = Arc::clone(self);
            tokio::spawn(async move { manager.sync_with_network().await });
            return;
        }

        if block_index <= local_height {
            tracing::debug!(index = block_index, local_height, "stale block dropped");
            return;
        }

        match self.chain.append_block(block) {
            Ok(()) => {
                self.drain_pending_blocks();
                self.peers
                    .record_contact(sender, Some(block_index), None, false, Utc::now());
            }
            Err(err @ ChainError::ChainBroken(_)) => {
                // The incoming block is dropped and local state stays intact
                tracing::error!(index = block_index, %err, "rejected peer block");
            }
            Err(err) => {
                tracing::warn!(index = block_index, %err, "could not append peer block");
            }
        }
    }

    /// Append any buffered blocks that now directly extend the tip.
    fn drain_pending_blocks(&self) {
        loop {
            let next_index = self.chain.height() + 1;
            let next = {
                let mut pending = self.pending_blocks.lock();
                match pending.iter().position(|b| b.index == next_index) {
                    Some(pos) => pending.remove(pos),
                    None => break,
                }
            };
            if let Err(err) = self.chain.append_block(next) {
                tracing::warn!(index = next_index, %err, "buffered block no longer applies");
            }
        }
    }

    fn handle_transaction(&self, tx: Transaction, sender: &str) {
        let id = tx.id.clone();
        match self.chain.add_transaction(tx) {
            Ok(()) => {
                tracing::debug!(%id, "gossiped transaction admitted");
            }
            Err(ChainError::DuplicateId(_)) => {
                tracing::debug!(%id, "gossiped transaction already known");
            }
            Err(err) => {
                tracing::debug!(%id, %err, "gossiped transaction rejected");
            }
        }
        self.peers.record_contact(sender, None, None, false, Utc::now());
    }

    /// Catch up with the tallest reachable peer by requesting the missing
    /// heights in order. At most one sync runs at a time; a failed request
    /// demotes the peer and ends the attempt until the next tick.
    pub async fn sync_with_network(self: Arc<Self>) {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync already in progress");
            return;
        }

        let local_height = self.chain.height();
        let Some(best) = self.peers.best_peer(local_height) else {
            tracing::debug!("no peer ahead of local height {}", local_height);
            self.syncing.store(false, Ordering::SeqCst);
            return;
        };

        tracing::info!(
            peer = %best.url,
            from = local_height + 1,
            to = best.block_height,
            "syncing missing blocks"
        );

        for height in (local_height + 1)..=best.block_height {
            let request = Message::block_request(height, &self.config.node_url);
            match self.transport.send(&best.url, &request).await {
                Ok(Some(reply)) if reply.msg_type == MessageType::Block => {
                    match serde_json::from_value::<Block>(reply.payload) {
                        Ok(block) => self.handle_block(block, &best.url),
                        Err(err) => {
                            tracing::warn!(height, %err, "undecodable block during sync");
                            break;
                        }
                    }
                }
                Ok(_) => {
                    tracing::debug!(height, peer = %best.url, "peer had no block at height");
                    break;
                }
                Err(err) => {
                    tracing::debug!(height, peer = %best.url, %err, "sync request failed");
                    self.peers.mark_inactive(&best.url);
                    break;
                }
            }
        }

        self.syncing.store(false, Ordering::SeqCst);
    }

    /// Number of buffered out-of-order blocks.
    pub fn pending_block_count(&self) -> usize {
        self.pending_blocks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FindValueReply, NetworkError, Result as NetResult};
    use async_trait::async_trait;
    use cryptochain_chain::ChainConfig;
    use cryptochain_consensus::{mine, DifficultyConfig};
    use parking_lot::RwLock;
    use std::collections::HashMap;

    /// In-memory wire: delivers envelopes straight into the target
    /// manager's handler and records block requests.
    #[derive(Default)]
    struct Hub {
        nodes: RwLock<HashMap<String, Arc<PeerManager>>>,
        block_requests: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl PeerTransport for Hub {
        async fn send(&self, url: &str, message: &Message) -> NetResult<Option<Message>> {
            if message.msg_type == MessageType::BlockRequest {
                let height = message.payload["height"].as_u64().unwrap_or(0);
                self.block_requests.lock().push((url.to_string(), height));
            }
            let target = self
                .nodes
                .read()
                .get(url)
                .cloned()
                .ok_or_else(|| NetworkError::Unreachable(url.to_string()))?;
            Ok(target.handle_message(message.clone()))
        }

        async fn find_node(&self, url: &str, _target: &str) -> NetResult<Vec<crate::dht::DhtNode>> {
            Err(NetworkError::Unreachable(url.to_string()))
        }

        async fn store(&self, _url: &str, _key: &str, _value: &str) -> NetResult<()> {
            Ok(())
        }

        async fn find_value(&self, url: &str, _key: &str) -> NetResult<FindValueReply> {
            Err(NetworkError::Unreachable(url.to_string()))
        }
    }

    fn chain_config() -> ChainConfig {
        ChainConfig {
            initial_difficulty: 1,
            // A zero target keeps test chains at difficulty 1
            difficulty: DifficultyConfig {
                target_block_time: Duration::from_secs(0),
            },
            ..ChainConfig::default()
        }
    }

    async fn node(hub: &Arc<Hub>, url: &str, chain: Arc<Blockchain>) -> Arc<PeerManager> {
        let manager = PeerManager::new(
            NetworkConfig::new(url),
            chain,
            Arc::clone(hub) as Arc<dyn PeerTransport>,
        );
        hub.nodes.write().insert(url.to_string(), Arc::clone(&manager));
        manager
    }

    async fn chain_of_height(height: u64) -> Arc<Blockchain> {
        let chain = Arc::new(Blockchain::new(chain_config()).await);
        for _ in 0..height {
            chain.create_block("miner1").await.unwrap();
        }
        chain
    }

    /// Credit an address through a mined block carrying a system transfer.
    async fn fund(chain: &Blockchain, address: &str, amount: f64) {
        let tip = chain.tip();
        let grant =
            cryptochain_core::Transaction::new(cryptochain_core::SYSTEM_ADDRESS, address, amount, 0.0);
        let mut block = Block::new(
            tip.index + 1,
            tip.hash,
            vec![grant],
            chain.difficulty(),
            "faucet".to_string(),
        );
        mine(&mut block, chain.difficulty()).await;
        chain.append_block(block).unwrap();
    }

    fn prefix_chain(source: &Blockchain, height: u64) -> Arc<Blockchain> {
        let blocks: Vec<Block> = source
            .blocks()
            .into_iter()
            .take(height as usize + 1)
            .collect();
        Arc::new(Blockchain::from_blocks(blocks, chain_config()).unwrap())
    }

    #[tokio::test]
    async fn test_ping_exchanges_node_info() {
        let hub = Arc::new(Hub::default());
        let chain_a = chain_of_height(2).await;
        let chain_b = prefix_chain(&chain_a, 0);

        let a = node(&hub, "http://a", chain_a).await;
        let b = node(&hub, "http://b", chain_b).await;

        b.add_peer("http://a");
        b.ping_peer("http://a").await;

        // b learned a's height, a learned about b from the ping payload
        assert_eq!(b.peers().get("http://a").unwrap().block_height, 2);
        assert!(a.peers().get("http://b").is_some());
        assert_eq!(a.peers().get("http://b").unwrap().block_height, 0);
    }

    #[tokio::test]
    async fn test_gossiped_block_extends_tip() {
        let hub = Arc::new(Hub::default());
        let chain_a = chain_of_height(0).await;
        let chain_b = prefix_chain(&chain_a, 0);

        let _a = node(&hub, "http://a", Arc::clone(&chain_a)).await;
        let b = node(&hub, "http://b", Arc::clone(&chain_b)).await;

        chain_a.create_block("miner1").await.unwrap();
        let block = chain_a.tip();

        b.handle_message(Message::block(&block, "http://a"));
        assert_eq!(chain_b.height(), 1);
        assert_eq!(chain_b.tip().hash, block.hash);
    }

    #[tokio::test]
    async fn test_known_block_is_dropped() {
        let hub = Arc::new(Hub::default());
        let chain = chain_of_height(1).await;
        let manager = node(&hub, "http://a", Arc::clone(&chain)).await;

        let tip = chain.tip();
        manager.handle_message(Message::block(&tip, "http://b"));
        assert_eq!(chain.height(), 1);
    }

    #[tokio::test]
    async fn test_stale_block_is_dropped() {
        let hub = Arc::new(Hub::default());
        let chain_a = chain_of_height(3).await;
        let chain_b = prefix_chain(&chain_a, 3);

        let b = node(&hub, "http://b", Arc::clone(&chain_b)).await;

        // A block at an already-covered height, but a different hash
        let mut stale = chain_a.block_by_index(2).unwrap();
        stale.nonce += 999;
        stale.hash = stale.compute_hash();
        b.handle_message(Message::block(&stale, "http://a"));

        assert_eq!(chain_b.height(), 3);
        assert_eq!(chain_b.tip().hash, chain_a.tip().hash);
    }

    #[tokio::test]
    async fn test_invalid_block_leaves_state_intact() {
        let hub = Arc::new(Hub::default());
        let chain = chain_of_height(1).await;
        let manager = node(&hub, "http://a", Arc::clone(&chain)).await;

        let mut bogus = Block::new(2, "f".repeat(64), vec![], 1, "evil".to_string());
        mine(&mut bogus, 1).await;

        manager.handle_message(Message::block(&bogus, "http://evil"));
        assert_eq!(chain.height(), 1);
        assert!(chain.validate().is_ok());
    }

    #[tokio::test]
    async fn test_ahead_block_is_buffered_then_drained() {
        let hub = Arc::new(Hub::default());
        let chain_a = chain_of_height(3).await;
        let chain_b = prefix_chain(&chain_a, 1);

        let b = node(&hub, "http://b", Arc::clone(&chain_b)).await;

        // Height 3 arrives first: too far ahead, buffered
        let block3 = chain_a.block_by_index(3).unwrap();
        b.handle_message(Message::block(&block3, "http://a"));
        assert_eq!(chain_b.height(), 1);
        assert_eq!(b.pending_block_count(), 1);

        // Height 2 arrives: appended, and the buffered 3 drains after it
        let block2 = chain_a.block_by_index(2).unwrap();
        b.handle_message(Message::block(&block2, "http://a"));
        assert_eq!(chain_b.height(), 3);
        assert_eq!(b.pending_block_count(), 0);
        assert_eq!(chain_b.tip().hash, chain_a.tip().hash);
    }

    #[tokio::test]
    async fn test_gossiped_transaction_admitted() {
        let hub = Arc::new(Hub::default());
        let chain = chain_of_height(0).await;
        let manager = node(&hub, "http://a", Arc::clone(&chain)).await;

        let kp = cryptochain_core::KeyPair::generate();
        fund(&chain, &kp.address(), 10.0).await;

        let tx = cryptochain_core::Transaction::new(&kp.address(), "bob", 2.0, 0.1).signed(&kp);
        manager.handle_message(Message::transaction(&tx, "http://b"));
        assert!(chain.mempool().contains(&tx.id));

        // A second delivery is a no-op
        manager.handle_message(Message::transaction(&tx, "http://b"));
        assert_eq!(chain.mempool().len(), 1);
    }

    #[tokio::test]
    async fn test_block_request_returns_block() {
        let hub = Arc::new(Hub::default());
        let chain = chain_of_height(2).await;
        let manager = node(&hub, "http://a", Arc::clone(&chain)).await;

        let reply = manager
            .handle_message(Message::block_request(1, "http://b"))
            .unwrap();
        assert_eq!(reply.msg_type, MessageType::Block);
        let block: Block = serde_json::from_value(reply.payload).unwrap();
        assert_eq!(block.index, 1);

        // Out of range: no reply
        assert!(manager
            .handle_message(Message::block_request(99, "http://b"))
            .is_none());
    }

    #[tokio::test]
    async fn test_peers_list_reply() {
        let hub = Arc::new(Hub::default());
        let chain = chain_of_height(0).await;
        let manager = node(&hub, "http://a", chain).await;
        manager
            .peers()
            .record_contact("http://c", Some(1), None, false, Utc::now());

        let reply = manager
            .handle_message(Message::peers_list(&[], "http://b"))
            .unwrap();
        let peers: Vec<String> = serde_json::from_value(reply.payload).unwrap();
        assert!(peers.contains(&"http://a".to_string()));
        assert!(peers.contains(&"http://c".to_string()));
    }

    #[tokio::test]
    async fn test_sync_requests_heights_in_order() {
        let hub = Arc::new(Hub::default());
        let chain_a = chain_of_height(10).await;
        let chain_b = prefix_chain(&chain_a, 5);

        let _a = node(&hub, "http://a", Arc::clone(&chain_a)).await;
        let b = node(&hub, "http://b", Arc::clone(&chain_b)).await;

        // b learns of a through a ping
        b.add_peer("http://a");
        b.ping_peer("http://a").await;
        assert_eq!(b.peers().get("http://a").unwrap().block_height, 10);

        Arc::clone(&b).sync_with_network().await;

        assert_eq!(chain_b.height(), 10);
        assert_eq!(chain_b.tip().hash, chain_a.tip().hash);
        assert!(chain_b.validate().is_ok());

        // Heights 6..=10 were requested in order
        let requests: Vec<u64> = hub
            .block_requests
            .lock()
            .iter()
            .map(|(_, height)| *height)
            .collect();
        assert_eq!(requests, vec![6, 7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_sync_with_no_taller_peer_is_noop() {
        let hub = Arc::new(Hub::default());
        let chain = chain_of_height(3).await;
        let manager = node(&hub, "http://a", Arc::clone(&chain)).await;
        manager
            .peers()
            .record_contact("http://short", Some(1), None, false, Utc::now());

        Arc::clone(&manager).sync_with_network().await;
        assert_eq!(chain.height(), 3);
        assert!(hub.block_requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_peer_marked_inactive() {
        let hub = Arc::new(Hub::default());
        let chain = chain_of_height(0).await;
        let manager = node(&hub, "http://a", chain).await;

        manager.add_peer("http://ghost");
        manager.ping_peer("http://ghost").await;
        assert_eq!(
            manager.peers().get("http://ghost").unwrap().status,
            crate::peer::NodeStatus::Inactive
        );
    }
}
