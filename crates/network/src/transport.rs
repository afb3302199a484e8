//! Outbound transport seam.
//!
//! All network I/O goes through [`PeerTransport`], so the gossip and DHT
//! logic can be driven by an in-memory fake in tests while production uses
//! the HTTP client with a hard per-call timeout.

use crate::dht::DhtNode;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Per-call timeout for every outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transient network failures. These mark the peer as degraded but never
/// propagate past the networking layer.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("peer returned malformed data: {0}")]
    Malformed(String),

    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Reply shape of `/p2p/find_value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueReply {
    pub success: bool,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Outbound operations against one peer.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// POST an envelope to the peer's `/p2p/message`. The reply is either
    /// empty (acknowledgement) or a single envelope.
    async fn send(&self, url: &str, message: &Message) -> Result<Option<Message>>;

    /// GET the peer's closest nodes to a target id (hex).
    async fn find_node(&self, url: &str, target_hex: &str) -> Result<Vec<DhtNode>>;

    /// POST a key/value pair for the peer to hold.
    async fn store(&self, url: &str, key: &str, value_hex: &str) -> Result<()>;

    /// GET a value by key from the peer.
    async fn find_value(&self, url: &str, key: &str) -> Result<FindValueReply>;
}

/// reqwest-backed transport used by the running node.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct FindNodeReply {
    success: bool,
    #[serde(default)]
    nodes: Vec<DhtNode>,
}

#[derive(Deserialize)]
struct StoreReply {
    success: bool,
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send(&self, url: &str, message: &Message) -> Result<Option<Message>> {
        let response = self
            .client
            .post(format!("{}/p2p/message", url))
            .json(message)
            .send()
            .await
            .map_err(|e| NetworkError::Unreachable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkError::Malformed(e.to_string()))?;
        if body.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| NetworkError::Malformed(e.to_string()))
    }

    async fn find_node(&self, url: &str, target_hex: &str) -> Result<Vec<DhtNode>> {
        let reply: FindNodeReply = self
            .client
            .get(format!("{}/p2p/find_node", url))
            .query(&[("target", target_hex)])
            .send()
            .await
            .map_err(|e| NetworkError::Unreachable(format!("{}: {}", url, e)))?
            .json()
            .await
            .map_err(|e| NetworkError::Malformed(e.to_string()))?;

        if !reply.success {
            return Err(NetworkError::Malformed(format!(
                "unsuccessful find_node from {}",
                url
            )));
        }
        Ok(reply.nodes)
    }

    async fn store(&self, url: &str, key: &str, value_hex: &str) -> Result<()> {
        let reply: StoreReply = self
            .client
            .post(format!("{}/p2p/store", url))
            .json(&serde_json::json!({ "key": key, "value": value_hex }))
            .send()
            .await
            .map_err(|e| NetworkError::Unreachable(format!("{}: {}", url, e)))?
            .json()
            .await
            .map_err(|e| NetworkError::Malformed(e.to_string()))?;

        if !reply.success {
            return Err(NetworkError::Malformed(format!(
                "store rejected by {}",
                url
            )));
        }
        Ok(())
    }

    async fn find_value(&self, url: &str, key: &str) -> Result<FindValueReply> {
        self.client
            .get(format!("{}/p2p/find_value", url))
            .query(&[("key", key)])
            .send()
            .await
            .map_err(|e| NetworkError::Unreachable(format!("{}: {}", url, e)))?
            .json()
            .await
            .map_err(|e| NetworkError::Malformed(e.to_string()))
    }
}
