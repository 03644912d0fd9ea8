//! HTTP endpoints of the relay server.
//!
//! - `GET /` – liveness
//! - `GET /addresses/{address}` – wallet address and nonces of an owner
//! - `GET /relayer` – relayer address
//! - `POST /transactions/{address}` – relay a signed batch
//! - `GET /transactions/{address}` – recorded batches of an owner
//! - `GET /stats` – ledger writer counters
//!
//! Errors are returned as `{"error": "..."}` with the status chosen in
//! [`IntoResponse for RelayError`](RelayError).

use alloy::primitives::{Address, ChainId, U256};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::ChainGateway;
use crate::error::RelayError;
use crate::ledger::{Ledger, LedgerError, LedgerFilters, LedgerWriter};
use crate::relay::{RelaySubmitter, Submission};
use crate::types::SubmitRequest;
use crate::wallet::{WalletNonces, WalletResolver};

/// Shared state of every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub gateway: Arc<dyn ChainGateway>,
    pub resolver: WalletResolver,
    pub submitter: RelaySubmitter,
    pub ledger: Ledger,
    pub writer: LedgerWriter,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/addresses/{address}", get(get_address))
        .route("/relayer", get(get_relayer))
        .route(
            "/transactions/{address}",
            get(get_transactions).post(post_transaction),
        )
        .route("/stats", get(get_stats))
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WalletQuery {
    id: Option<String>,
    #[serde(rename = "chainId")]
    chain_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddressResponse {
    address: Address,
    /// Chain ID (as string) to wallet nonce.
    nonces: BTreeMap<String, u64>,
    /// Chains whose nonce could not be read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<ChainId>,
}

fn parse_address(raw: &str) -> Result<Address, RelayError> {
    Address::from_str(raw).map_err(|_| RelayError::InvalidAddress(raw.to_string()))
}

fn parse_index(raw: Option<&str>) -> Result<U256, RelayError> {
    match raw {
        None | Some("") => Ok(U256::ZERO),
        Some(raw) => U256::from_str(raw)
            .map_err(|_| RelayError::InvalidRequest(format!("invalid wallet id {raw:?}"))),
    }
}

fn nonce_number(chain_id: ChainId, nonce: U256) -> Result<u64, RelayError> {
    if nonce > U256::from(u64::MAX) {
        return Err(RelayError::Rpc(format!(
            "wallet nonce {nonce} on chain {chain_id} does not fit in 64 bits"
        )));
    }
    Ok(nonce.saturating_to())
}

fn parse_chain_id(raw: Option<&str>) -> Result<Option<ChainId>, RelayError> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| RelayError::InvalidRequest(format!("invalid chainId {raw:?}"))),
    }
}

/// `GET /`: liveness probe.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "result": "ok" })))
}

/// `GET /addresses/{address}?id&chainId`: the owner's wallet address and its nonce on
/// `chainId`, or on every configured chain when `chainId` is absent.
#[instrument(skip_all, fields(owner = %owner))]
pub async fn get_address(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<WalletQuery>,
) -> Result<impl IntoResponse, RelayError> {
    let owner = parse_address(&owner)?;
    let index = parse_index(query.id.as_deref())?;

    let found = match parse_chain_id(query.chain_id.as_deref())? {
        Some(chain_id) => {
            if !state.gateway.supports(chain_id) {
                return Err(RelayError::UnsupportedChain(chain_id));
            }
            let address = state.resolver.compute_address(owner, index, chain_id).await?;
            let nonce = state.resolver.current_nonce(address, chain_id).await?;
            WalletNonces {
                address,
                nonces: BTreeMap::from([(chain_id, nonce)]),
                failed: BTreeMap::new(),
            }
        }
        None => state.resolver.nonces(owner, index).await?,
    };

    let nonces = found
        .nonces
        .into_iter()
        .map(|(chain_id, nonce)| Ok((chain_id.to_string(), nonce_number(chain_id, nonce)?)))
        .collect::<Result<_, RelayError>>()?;
    Ok(Json(AddressResponse {
        address: found.address,
        nonces,
        failed: found.failed.into_keys().collect(),
    }))
}

/// `GET /relayer?chainId`: address of the relayer key.
#[instrument(skip_all)]
pub async fn get_relayer(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> Result<impl IntoResponse, RelayError> {
    if let Some(chain_id) = parse_chain_id(query.chain_id.as_deref())? {
        if !state.gateway.supports(chain_id) {
            return Err(RelayError::UnsupportedChain(chain_id));
        }
    }
    Ok(Json(json!({ "address": state.gateway.relayer_address() })))
}

/// `POST /transactions/{address}?id`: validates, prices and optionally sends a signed batch.
#[instrument(skip_all, fields(owner = %owner))]
pub async fn post_transaction(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<WalletQuery>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    let Json(body) = body.map_err(|rejection| RelayError::InvalidRequest(rejection.body_text()))?;
    let submission = Submission {
        owner: parse_address(&owner)?,
        index: parse_index(query.id.as_deref())?,
        transaction: body.transaction,
        send_internally: body.send_internally,
    };

    match state.submitter.submit(submission).await {
        Ok(response) => Ok((StatusCode::CREATED, Json(response))),
        Err(error) => {
            tracing::warn!(error = %error, "Submission rejected");
            Err(error)
        }
    }
}

/// `GET /transactions/{address}?id&chainID`: recorded batches of the owner.
///
/// `chainId` is accepted as an alias of `chainID`. Any other key besides `id` is rejected.
#[instrument(skip_all, fields(owner = %owner))]
pub async fn get_transactions(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(mut filters): Query<LedgerFilters>,
) -> Result<impl IntoResponse, RelayError> {
    let owner = parse_address(&owner)?;

    if let Some(chain_id) = filters.remove("chainId") {
        filters.entry("chainID".to_string()).or_insert(chain_id);
    }
    filters.insert("address".to_string(), owner.to_string());

    let records = state.ledger.query_filters(&filters).await?;
    Ok(Json(records))
}

/// `GET /stats`: ledger writer counters.
#[instrument(skip_all)]
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "ledger": state.writer.stats() })))
}

fn status_of(error: &RelayError) -> StatusCode {
    match error {
        RelayError::InsufficientFee { .. } => StatusCode::PAYMENT_REQUIRED,
        RelayError::ExecutionWouldRevert(_)
        | RelayError::InvalidRecipient(_)
        | RelayError::InvalidAddress(_)
        | RelayError::InvalidRequest(_)
        | RelayError::InsufficientBalance { .. }
        | RelayError::InsufficientAmount { .. }
        | RelayError::EmptyBatch
        | RelayError::MalformedEnvelope(_)
        | RelayError::WalletIndexUnavailable { .. }
        | RelayError::UnsupportedChain(_) => StatusCode::BAD_REQUEST,
        RelayError::ChainUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Rpc(_) | RelayError::WalletNotDeployed { .. } => StatusCode::BAD_GATEWAY,
        RelayError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RelayError::Ledger(
            LedgerError::InvalidFilter(_)
            | LedgerError::DuplicateTransaction(_)
            | LedgerError::Persistence(_)
            | LedgerError::Serialization(_),
        ) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        match self {
            RelayError::InsufficientFee { .. } => (
                status,
                Json(ErrorResponse {
                    error: "Insufficient fee payment".to_string(),
                }),
            )
                .into_response(),
            RelayError::ConfirmationTimeout { tx_hash } => (
                status,
                Json(json!({
                    "error": format!("Transaction {tx_hash} was not confirmed in time"),
                    "txHash": tx_hash,
                })),
            )
                .into_response(),
            RelayError::Ledger(LedgerError::InvalidFilter(_)) => (
                status,
                Json(ErrorResponse {
                    error: "Invalid filters".to_string(),
                }),
            )
                .into_response(),
            other => (
                status,
                Json(ErrorResponse {
                    error: other.to_string(),
                }),
            )
                .into_response(),
        }
    }
}
