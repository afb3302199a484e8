//! Wire envelope and payload shapes.

use chrono::{DateTime, Utc};
use cryptochain_core::{Block, Transaction};
use serde::{Deserialize, Serialize};

/// Message kinds exchanged between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Block,
    Transaction,
    NodeInfo,
    BlockRequest,
    PeersList,
    Ping,
}

/// The envelope every gossip message travels in: JSON over HTTP POST to
/// `/p2p/message`. The payload is a nested document whose shape depends on
/// the type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub payload: serde_json::Value,
    pub sender: String,
    pub time: DateTime<Utc>,
}

impl Message {
    fn envelope(msg_type: MessageType, payload: serde_json::Value, sender: &str) -> Self {
        Self {
            msg_type,
            payload,
            sender: sender.to_string(),
            time: Utc::now(),
        }
    }

    pub fn block(block: &Block, sender: &str) -> Self {
        Self::envelope(
            MessageType::Block,
            serde_json::to_value(block).expect("block serializes"),
            sender,
        )
    }

    pub fn transaction(tx: &Transaction, sender: &str) -> Self {
        Self::envelope(
            MessageType::Transaction,
            serde_json::to_value(tx).expect("transaction serializes"),
            sender,
        )
    }

    pub fn node_info(info: &NodeInfoPayload, sender: &str) -> Self {
        Self::envelope(
            MessageType::NodeInfo,
            serde_json::to_value(info).expect("node info serializes"),
            sender,
        )
    }

    pub fn ping(info: &NodeInfoPayload, sender: &str) -> Self {
        Self::envelope(
            MessageType::Ping,
            serde_json::to_value(info).expect("node info serializes"),
            sender,
        )
    }

    pub fn block_request(height: u64, sender: &str) -> Self {
        Self::envelope(
            MessageType::BlockRequest,
            serde_json::to_value(BlockRequestPayload { height }).expect("request serializes"),
            sender,
        )
    }

    pub fn peers_list(peers: &[String], sender: &str) -> Self {
        Self::envelope(
            MessageType::PeersList,
            serde_json::to_value(peers).expect("peer list serializes"),
            sender,
        )
    }
}

/// Payload of PING and NODE_INFO messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoPayload {
    pub node_url: String,
    pub block_height: u64,
    pub version: String,
    pub is_validator: bool,
}

/// Payload of BLOCK_REQUEST messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockRequestPayload {
    pub height: u64,
}
