//! Node assembly: storage-backed boot, background workers, and shutdown.

use crate::wallets::WalletDir;
use chrono::Utc;
use cryptochain_chain::{Blockchain, ChainConfig};
use cryptochain_contracts::AlwaysSatisfied;
use cryptochain_network::{Dht, DhtNode, HttpTransport, NetworkConfig, PeerManager, PeerTransport};
use cryptochain_staking::{StakingConfig, StakingPool};
use cryptochain_storage::{ChainStore, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How often derived state is flushed to disk.
const PERSIST_INTERVAL: Duration = Duration::from_secs(5);

/// How often the staking and contract sweeps run.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How often the DHT refreshes its routing table.
const DHT_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

/// Node configuration assembled by the CLI.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub listen: std::net::SocketAddr,
    /// URL this node advertises to peers.
    pub node_url: String,
    pub seeds: Vec<String>,
    pub is_validator: bool,
    /// Mine continuously to this address whenever transactions are pending.
    pub mine_to: Option<String>,
    pub chain: ChainConfig,
    pub staking: StakingConfig,
}

/// A running node's shared components.
pub struct Node {
    pub chain: Arc<Blockchain>,
    pub staking: Arc<StakingPool>,
    pub store: Arc<Store>,
    pub manager: Arc<PeerManager>,
    pub dht: Arc<Dht>,
    pub wallets: Arc<WalletDir>,
    pub config: NodeConfig,
}

impl Node {
    /// Boot a node from its data directory: load the persisted chain (or
    /// mine a fresh genesis), replay balances, and restore the mempool
    /// snapshot.
    pub async fn boot(config: NodeConfig) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(Store::open(config.data_dir.join("db"))?);
        let chain_store = ChainStore::new(&store);

        let blocks = chain_store.load_blocks()?;
        let chain = if blocks.is_empty() {
            tracing::info!("no stored chain, mining genesis");
            let chain = Blockchain::new(config.chain.clone()).await;
            chain_store.put_block(&chain.tip())?;
            Arc::new(chain)
        } else {
            tracing::info!(height = blocks.len() - 1, "replaying stored chain");
            Arc::new(Blockchain::from_blocks(blocks, config.chain.clone())?)
        };

        let snapshot = chain_store.load_mempool()?;
        if !snapshot.is_empty() {
            tracing::info!(pending = snapshot.len(), "restoring mempool snapshot");
            chain.mempool().restore(snapshot);
        }

        let transport: Arc<dyn PeerTransport> = Arc::new(HttpTransport::new());
        let mut network_config = NetworkConfig::new(&config.node_url);
        network_config.is_validator = config.is_validator;
        let manager = PeerManager::new(network_config, Arc::clone(&chain), Arc::clone(&transport));
        let dht = Arc::new(Dht::new(&config.node_url, transport));

        let staking = Arc::new(StakingPool::new(config.staking.clone(), Utc::now()));
        let wallets = Arc::new(WalletDir::new(config.data_dir.join("wallets")));

        Ok(Arc::new(Self {
            chain,
            staking,
            store,
            manager,
            dht,
            wallets,
            config,
        }))
    }

    /// Spawn the long-lived workers: peer discovery, periodic sync, staking
    /// and contract sweeps, DHT refresh, persistence, and the optional
    /// miner.
    pub fn spawn_workers(self: &Arc<Self>) {
        for seed in &self.config.seeds {
            self.manager.add_peer(seed);
        }

        // Discovery: ping peers and pull peer lists
        {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                let bootstrap: Vec<String> = node.config.seeds.clone();
                node.dht.bootstrap(&bootstrap).await;
                let mut tick =
                    tokio::time::interval(node.manager.config().ping_interval);
                loop {
                    tick.tick().await;
                    node.manager.ping_all().await;
                    if let Some(url) = node.manager.peers().reachable_urls().first() {
                        node.manager.request_peers(url).await;
                    }
                }
            });
        }

        // Periodic chain sync
        {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(node.manager.config().sync_interval);
                loop {
                    tick.tick().await;
                    Arc::clone(&node.manager).sync_with_network().await;
                }
            });
        }

        // Staking sweep: distribute rewards, expire stakes
        {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    tick.tick().await;
                    let now = Utc::now();
                    node.staking.distribute_rewards(now);
                    let expired = node.staking.process_expired_stakes(now);
                    if expired > 0 {
                        tracing::info!(expired, "stakes moved to unstaking");
                    }
                }
            });
        }

        // Contract sweep: expire and auto-execute pending contracts
        {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    tick.tick().await;
                    let contracts = cryptochain_storage::ContractStore::new(&node.store);
                    if let Err(err) = node.chain.process_pending_contracts(
                        &contracts,
                        node.wallets.as_ref(),
                        &AlwaysSatisfied,
                        Utc::now(),
                    ) {
                        tracing::warn!(%err, "contract sweep failed");
                    }
                }
            });
        }

        // DHT refresh
        {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(DHT_REFRESH_INTERVAL);
                loop {
                    tick.tick().await;
                    node.dht.refresh().await;
                }
            });
        }

        // Persistence: reconcile the store with the in-memory chain
        {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(PERSIST_INTERVAL);
                loop {
                    tick.tick().await;
                    if let Err(err) = node.persist() {
                        tracing::error!(%err, "persistence failed");
                    }
                }
            });
        }

        // Optional miner: work whenever transactions are pending
        if let Some(miner) = self.config.mine_to.clone() {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    if node.chain.mempool().is_empty() {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                    match node.chain.create_block(&miner).await {
                        Ok(block) => {
                            node.manager.broadcast_block(&block);
                            let _ = node
                                .staking
                                .record_validated_block(&miner, Utc::now());
                        }
                        Err(err) => {
                            tracing::warn!(%err, "mining attempt failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            });
        }
    }

    /// Write blocks the store has not seen yet, plus the balance cache.
    pub fn persist(&self) -> anyhow::Result<()> {
        let chain_store = ChainStore::new(&self.store);
        let stored = chain_store.latest_height()?;
        let height = self.chain.height();

        let from = match stored {
            Some(h) if h >= height => return Ok(()),
            Some(h) => h + 1,
            None => 0,
        };
        for index in from..=height {
            if let Some(block) = self.chain.block_by_index(index) {
                chain_store.put_block(&block)?;
            }
        }
        chain_store.put_balances(&self.chain.balances())?;
        self.store.flush()?;
        Ok(())
    }

    /// Snapshot the mempool and flush everything on the way down.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.persist()?;
        let chain_store = ChainStore::new(&self.store);
        chain_store.save_mempool(&self.chain.mempool().snapshot())?;
        self.store.flush()?;
        tracing::info!("state persisted, shutting down");
        Ok(())
    }

    /// Seed the DHT with a freshly learned peer.
    pub async fn learn_peer(&self, url: &str) {
        self.manager.add_peer(url);
        self.dht.add_node(DhtNode::from_url(url)).await;
    }
}
