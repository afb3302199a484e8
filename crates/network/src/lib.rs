//! Peer-to-peer networking for cryptochain.
//!
//! Two layers share one HTTP surface:
//! - A gossip layer that broadcasts blocks and transactions to known peers,
//!   answers block requests, and synchronizes a lagging chain from the
//!   tallest peer (`/p2p/message`).
//! - A Kademlia-style DHT that routes by XOR distance over 160-bit node ids
//!   (`/p2p/find_node`, `/p2p/store`, `/p2p/find_value`).
//!
//! Network failures never propagate past the caller: an unreachable peer is
//! marked inactive and retried on the next discovery tick.

pub mod dht;
pub mod manager;
pub mod message;
pub mod peer;
pub mod server;
pub mod transport;

pub use dht::{bucket_index, node_id_from_url, xor_distance, Dht, DhtNode, NodeId, RoutingTable};
pub use manager::{NetworkConfig, PeerManager};
pub use message::{BlockRequestPayload, Message, MessageType, NodeInfoPayload};
pub use peer::{NodeRecord, NodeStatus, PeerRegistry};
pub use server::p2p_router;
pub use transport::{FindValueReply, HttpTransport, NetworkError, PeerTransport};
