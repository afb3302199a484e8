//! REST surface exposed to non-core collaborators (CLI, explorers).
//!
//! Thin axum handlers over the library crates: blocks, transactions,
//! mempool, mining, balances, contracts, and staking.

use crate::node::Node;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use cryptochain_chain::ChainError;
use cryptochain_contracts::{
    AlwaysSatisfied, Contract, ContractError, ContractParams, ContractType,
};
use cryptochain_core::Transaction;
use cryptochain_staking::StakingError;
use cryptochain_storage::{ContractStore, StorageError};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build the REST router around a running node.
pub fn api_router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/blocks", get(list_blocks))
        .route("/api/blocks/:index", get(get_block))
        .route("/api/chain/validate", get(validate_chain))
        .route("/api/transactions", post(submit_transaction))
        .route("/api/mempool", get(mempool))
        .route("/api/mine", post(mine_block))
        .route("/api/balance/:address", get(balance))
        .route("/api/wallets", get(list_wallets).post(create_wallet))
        .route("/api/peers", get(list_peers).post(add_peer))
        .route("/api/contracts", get(list_contracts).post(create_contract))
        .route("/api/contracts/:id", get(get_contract))
        .route("/api/contracts/:id/approve", post(approve_contract))
        .route("/api/contracts/:id/cancel", post(cancel_contract))
        .route("/api/contracts/:id/execute", post(execute_contract))
        .route("/api/stakes", get(list_stakes).post(create_stake))
        .route("/api/stakes/:id", get(get_stake))
        .route("/api/stakes/:id/claim", post(claim_stake))
        .route("/api/stakes/:id/unstake", post(unstake))
        .route("/api/stakes/:id/withdraw", post(withdraw_stake))
        .route("/api/validators", get(list_validators).post(register_validator))
        .route("/api/delegations", post(delegate))
        .with_state(node)
}

/// API failure with its HTTP status.
struct ApiError(StatusCode, String);

type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        let status = match &err {
            ChainError::InvalidTransaction(_) | ChainError::InsufficientFunds { .. } => {
                StatusCode::BAD_REQUEST
            }
            ChainError::DuplicateId(_) | ChainError::StaleTip { .. } => StatusCode::CONFLICT,
            ChainError::NotFound(_) | ChainError::SignerUnavailable(_) => StatusCode::NOT_FOUND,
            ChainError::ChainBroken(_) | ChainError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ChainError::Mempool(_) => StatusCode::CONFLICT,
            ChainError::Contract(inner) => return Self::from_contract(inner, err.to_string()),
        };
        Self(status, err.to_string())
    }
}

impl ApiError {
    fn from_contract(err: &ContractError, message: String) -> Self {
        let status = match err {
            ContractError::InvalidStatus(_)
            | ContractError::Expired
            | ContractError::NotExecutable
            | ContractError::AlreadyApproved => StatusCode::CONFLICT,
            ContractError::NotParticipant | ContractError::NotAuthorized => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::BAD_REQUEST,
        };
        Self(status, message)
    }
}

impl From<ContractError> for ApiError {
    fn from(err: ContractError) -> Self {
        let message = err.to_string();
        Self::from_contract(&err, message)
    }
}

impl From<StakingError> for ApiError {
    fn from(err: StakingError) -> Self {
        let status = match &err {
            StakingError::AmountTooLow { .. }
            | StakingError::DurationOutOfRange { .. }
            | StakingError::InvalidCommission => StatusCode::BAD_REQUEST,
            StakingError::StakeNotFound(_) | StakingError::ValidatorNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::CONFLICT,
        };
        Self(status, err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, err.to_string())
    }
}

// =========================================================================
// Chain
// =========================================================================

async fn stats(State(node): State<Arc<Node>>) -> Response {
    Json(json!({
        "chain": node.chain.stats(),
        "staking": node.staking.stats(),
        "peers": node.manager.peers().len(),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct ListBlocksQuery {
    #[serde(default = "default_block_limit")]
    limit: usize,
}

fn default_block_limit() -> usize {
    10
}

async fn list_blocks(
    State(node): State<Arc<Node>>,
    Query(query): Query<ListBlocksQuery>,
) -> Response {
    let blocks = node.chain.blocks();
    let start = blocks.len().saturating_sub(query.limit);
    Json(&blocks[start..]).into_response()
}

async fn get_block(
    State(node): State<Arc<Node>>,
    Path(index): Path<u64>,
) -> ApiResult<Response> {
    let block = node
        .chain
        .block_by_index(index)
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("no block at {}", index)))?;
    Ok(Json(block).into_response())
}

async fn validate_chain(State(node): State<Arc<Node>>) -> Response {
    match node.chain.validate() {
        Ok(()) => Json(json!({ "valid": true })).into_response(),
        Err(err) => Json(json!({ "valid": false, "error": err.to_string() })).into_response(),
    }
}

async fn submit_transaction(
    State(node): State<Arc<Node>>,
    Json(tx): Json<Transaction>,
) -> ApiResult<Response> {
    node.chain.add_transaction(tx.clone())?;
    node.manager.broadcast_transaction(&tx);
    Ok(Json(json!({ "id": tx.id })).into_response())
}

async fn mempool(State(node): State<Arc<Node>>) -> Response {
    Json(node.chain.mempool().all()).into_response()
}

#[derive(Deserialize)]
struct MineRequest {
    miner: String,
}

async fn mine_block(
    State(node): State<Arc<Node>>,
    Json(request): Json<MineRequest>,
) -> ApiResult<Response> {
    let block = node.chain.create_block(&request.miner).await?;
    node.manager.broadcast_block(&block);
    let _ = node.staking.record_validated_block(&request.miner, Utc::now());
    Ok(Json(block).into_response())
}

async fn balance(State(node): State<Arc<Node>>, Path(address): Path<String>) -> Response {
    Json(json!({
        "address": address,
        "balance": node.chain.balance(&address),
    }))
    .into_response()
}

// =========================================================================
// Wallets & peers
// =========================================================================

async fn create_wallet(State(node): State<Arc<Node>>) -> ApiResult<Response> {
    let wallet = node
        .wallets
        .create()
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({
        "address": wallet.address,
        "publicKey": wallet.public_key,
        "privateKey": wallet.private_key,
    }))
    .into_response())
}

async fn list_wallets(State(node): State<Arc<Node>>) -> Response {
    Json(node.wallets.addresses()).into_response()
}

#[derive(Deserialize)]
struct AddPeerRequest {
    url: String,
}

async fn add_peer(
    State(node): State<Arc<Node>>,
    Json(request): Json<AddPeerRequest>,
) -> Response {
    node.learn_peer(&request.url).await;
    node.manager.ping_peer(&request.url).await;
    StatusCode::OK.into_response()
}

async fn list_peers(State(node): State<Arc<Node>>) -> Response {
    Json(node.manager.peers().snapshot()).into_response()
}

// =========================================================================
// Contracts
// =========================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateContractRequest {
    #[serde(rename = "type")]
    contract_type: ContractType,
    creator: String,
    #[serde(default)]
    participants: Vec<String>,
    #[serde(default)]
    required_approvals: usize,
    amount: f64,
    #[serde(default)]
    fee: f64,
    recipient: String,
    #[serde(default)]
    data: String,
    /// Lifetime of the contract in seconds.
    expires_in: i64,
    #[serde(default)]
    conditions: BTreeMap<String, String>,
}

async fn create_contract(
    State(node): State<Arc<Node>>,
    Json(request): Json<CreateContractRequest>,
) -> ApiResult<Response> {
    let contract = Contract::new(
        ContractParams {
            contract_type: request.contract_type,
            creator: request.creator,
            participants: request.participants,
            required_approvals: request.required_approvals,
            amount: request.amount,
            fee: request.fee,
            recipient: request.recipient,
            data: request.data,
            expires_in: chrono::Duration::seconds(request.expires_in),
            conditions: request.conditions,
        },
        Utc::now(),
    )?;

    let store = ContractStore::new(&node.store);
    node.chain.save_contract(&store, &contract)?;
    Ok(Json(contract).into_response())
}

#[derive(Deserialize)]
struct ListContractsQuery {
    address: Option<String>,
}

async fn list_contracts(
    State(node): State<Arc<Node>>,
    Query(query): Query<ListContractsQuery>,
) -> ApiResult<Response> {
    let store = ContractStore::new(&node.store);
    let contracts = match query.address {
        Some(address) => store.by_address(&address)?,
        None => store.all()?,
    };
    Ok(Json(contracts).into_response())
}

async fn get_contract(
    State(node): State<Arc<Node>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let store = ContractStore::new(&node.store);
    let mut contract = store.get_or_err(&id)?;
    // Expiry is lazy: inspection settles it
    if contract.check_expiration(Utc::now()) {
        store.put(&contract)?;
    }
    Ok(Json(contract).into_response())
}

#[derive(Deserialize)]
struct ApproveRequest {
    participant: String,
}

async fn approve_contract(
    State(node): State<Arc<Node>>,
    Path(id): Path<String>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Response> {
    let store = ContractStore::new(&node.store);
    let mut contract = store.get_or_err(&id)?;
    let outcome = contract.approve(&request.participant, Utc::now())?;
    store.put(&contract)?;
    Ok(Json(json!({
        "contract": contract,
        "approvals": outcome.approval_count,
        "required": outcome.required_approvals,
    }))
    .into_response())
}

#[derive(Deserialize)]
struct CancelRequest {
    actor: String,
}

async fn cancel_contract(
    State(node): State<Arc<Node>>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Response> {
    let store = ContractStore::new(&node.store);
    let mut contract = store.get_or_err(&id)?;
    contract.cancel(&request.actor, Utc::now())?;
    store.put(&contract)?;
    Ok(Json(contract).into_response())
}

async fn execute_contract(
    State(node): State<Arc<Node>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let store = ContractStore::new(&node.store);
    let tx = node.chain.execute_contract(
        &store,
        &id,
        node.wallets.as_ref(),
        &AlwaysSatisfied,
        Utc::now(),
    )?;
    node.manager.broadcast_transaction(&tx);
    Ok(Json(tx).into_response())
}

// =========================================================================
// Staking
// =========================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateStakeRequest {
    owner: String,
    amount: f64,
    /// Commitment in seconds.
    duration: i64,
}

async fn create_stake(
    State(node): State<Arc<Node>>,
    Json(request): Json<CreateStakeRequest>,
) -> ApiResult<Response> {
    let stake = node
        .staking
        .create_stake(&request.owner, request.amount, request.duration, Utc::now())?;
    Ok(Json(stake).into_response())
}

#[derive(Deserialize)]
struct ListStakesQuery {
    owner: String,
}

async fn list_stakes(
    State(node): State<Arc<Node>>,
    Query(query): Query<ListStakesQuery>,
) -> Response {
    Json(node.staking.stakes_by_owner(&query.owner)).into_response()
}

async fn get_stake(State(node): State<Arc<Node>>, Path(id): Path<String>) -> ApiResult<Response> {
    Ok(Json(node.staking.stake(&id)?).into_response())
}

async fn claim_stake(
    State(node): State<Arc<Node>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let reward = node.staking.claim_rewards(&id, Utc::now())?;
    Ok(Json(json!({ "reward": reward })).into_response())
}

async fn unstake(State(node): State<Arc<Node>>, Path(id): Path<String>) -> ApiResult<Response> {
    node.staking.initiate_unstake(&id, Utc::now())?;
    Ok(Json(node.staking.stake(&id)?).into_response())
}

async fn withdraw_stake(
    State(node): State<Arc<Node>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let returned = node.staking.withdraw(&id, Utc::now())?;
    Ok(Json(json!({ "returned": returned })).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterValidatorRequest {
    address: String,
    public_key: String,
    amount: f64,
}

async fn register_validator(
    State(node): State<Arc<Node>>,
    Json(request): Json<RegisterValidatorRequest>,
) -> ApiResult<Response> {
    let validator = node.staking.register_validator(
        &request.address,
        &request.public_key,
        request.amount,
        Utc::now(),
    )?;
    Ok(Json(validator).into_response())
}

async fn list_validators(State(node): State<Arc<Node>>) -> Response {
    Json(node.staking.validators()).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegateRequest {
    delegator: String,
    validator: String,
    amount: f64,
}

async fn delegate(
    State(node): State<Arc<Node>>,
    Json(request): Json<DelegateRequest>,
) -> ApiResult<Response> {
    let stake = node.staking.delegate(
        &request.delegator,
        &request.validator,
        request.amount,
        Utc::now(),
    )?;
    Ok(Json(stake).into_response())
}
