//! HTTP surface of the P2P layer.

use crate::dht::{Dht, K};
use crate::manager::PeerManager;
use crate::message::Message;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Shared state behind the P2P routes.
#[derive(Clone)]
pub struct P2pState {
    pub manager: Arc<PeerManager>,
    pub dht: Arc<Dht>,
}

/// Build the router serving the gossip envelope endpoint and the DHT
/// endpoints.
pub fn p2p_router(manager: Arc<PeerManager>, dht: Arc<Dht>) -> Router {
    Router::new()
        .route("/p2p/message", post(p2p_message))
        .route("/p2p/find_node", get(find_node))
        .route("/p2p/store", post(store_value))
        .route("/p2p/find_value", get(find_value))
        .with_state(P2pState { manager, dht })
}

/// POST /p2p/message: dispatch an envelope; the response is either empty
/// (acknowledgement) or a single reply envelope.
async fn p2p_message(State(state): State<P2pState>, Json(message): Json<Message>) -> Response {
    match state.manager.handle_message(message) {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::OK.into_response(),
    }
}

#[derive(Deserialize)]
struct FindNodeQuery {
    target: String,
}

/// GET /p2p/find_node?target=<hex20>
async fn find_node(State(state): State<P2pState>, Query(query): Query<FindNodeQuery>) -> Response {
    let Ok(bytes) = hex::decode(&query.target) else {
        return bad_request("invalid target id");
    };
    if bytes.len() != 20 {
        return bad_request("target id must be 20 bytes");
    }
    let mut target = [0u8; 20];
    target.copy_from_slice(&bytes);

    let nodes = state.dht.table().find_closest(&target, K);
    Json(json!({ "success": true, "nodes": nodes })).into_response()
}

#[derive(Deserialize)]
struct StoreBody {
    key: String,
    value: String,
}

/// POST /p2p/store with body `{key, value(hex)}`
async fn store_value(State(state): State<P2pState>, Json(body): Json<StoreBody>) -> Response {
    let Ok(value) = hex::decode(&body.value) else {
        return bad_request("invalid value encoding");
    };
    state.dht.store_local(&body.key, value);
    Json(json!({ "success": true })).into_response()
}

#[derive(Deserialize)]
struct FindValueQuery {
    key: String,
}

/// GET /p2p/find_value?key=<str>
async fn find_value(
    State(state): State<P2pState>,
    Query(query): Query<FindValueQuery>,
) -> Response {
    match state.dht.get_local(&query.key) {
        Some(value) => Json(json!({
            "success": true,
            "found": true,
            "value": hex::encode(value),
        }))
        .into_response(),
        None => Json(json!({ "success": true, "found": false })).into_response(),
    }
}

fn bad_request(reason: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": reason })),
    )
        .into_response()
}
