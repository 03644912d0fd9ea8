//! RPC-backed [`ChainGateway`].
//!
//! Each configured chain is resolved at construction: endpoints are probed in order and the
//! first one reporting the expected chain ID and a latest block above zero is kept for the
//! lifetime of the gateway. A chain without a healthy endpoint stays configured and calls on it
//! fail with [`RelayError::ChainUnavailable`]; the first call after `resolve_retry_seconds`
//! probes its endpoints again.
//!
//! All transactions are signed by a single relayer key. Sends on one chain are serialized so
//! the relayer's account nonce is assigned in order.

use alloy::hex;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, Bytes, ChainId, U256};
use alloy::providers::{
    DynProvider, PendingTransactionError, Provider, ProviderBuilder, RootProvider, WatchTxError,
};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use alloy::transports::http::Http;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{Instrument, instrument};
use url::Url;

use super::{ChainGateway, ExecutionEstimate};
use crate::config::{ChainConfig, RelayConfig, TransactionConfig};
use crate::error::RelayError;

/// A resolved chain: the winning endpoint and its provider.
#[derive(Debug)]
struct ChainConnection {
    rpc: Url,
    provider: DynProvider,
    /// Serializes relayer sends on this chain.
    send_lock: Arc<Mutex<()>>,
}

/// A configured chain. The connection is set by the first successful resolution.
#[derive(Debug)]
struct ChainSlot {
    config: ChainConfig,
    connection: OnceCell<ChainConnection>,
    /// When the last resolution attempt failed.
    last_failure: Mutex<Option<Instant>>,
}

#[derive(Debug)]
pub struct EvmGateway {
    chains: HashMap<ChainId, ChainSlot>,
    relayer: Address,
    wallet: EthereumWallet,
    timing: TransactionConfig,
}

impl EvmGateway {
    /// Resolves every configured chain and wires the relayer key into each provider.
    pub async fn try_new(config: &RelayConfig, signer: PrivateKeySigner) -> Result<Self, RelayError> {
        let relayer = signer.address();
        let chains = config
            .chains
            .iter()
            .map(|chain| {
                let slot = ChainSlot {
                    config: chain.clone(),
                    connection: OnceCell::new(),
                    last_failure: Mutex::new(None),
                };
                (chain.chain_id, slot)
            })
            .collect();

        let gateway = Self {
            chains,
            relayer,
            wallet: EthereumWallet::from(signer),
            timing: config.transaction.clone(),
        };

        for chain_id in gateway.chain_ids() {
            match gateway.connection(chain_id).await {
                Ok(_) => {}
                Err(RelayError::ChainUnavailable(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(gateway)
    }

    /// Connection of `chain_id`, resolving it first if it is not resolved yet and the retry
    /// interval since the last failure has passed.
    async fn connection(&self, chain_id: ChainId) -> Result<&ChainConnection, RelayError> {
        let slot = self
            .chains
            .get(&chain_id)
            .ok_or(RelayError::UnsupportedChain(chain_id))?;
        if let Some(connection) = slot.connection.get() {
            return Ok(connection);
        }

        if let Some(failed_at) = *slot.last_failure.lock().await {
            if failed_at.elapsed() < self.timing.resolve_retry() {
                return Err(RelayError::ChainUnavailable(chain_id));
            }
        }

        slot.connection
            .get_or_try_init(|| async {
                let Some(rpc) = resolve(&slot.config, &self.timing).await else {
                    tracing::error!(
                        chain_id,
                        endpoints = slot.config.rpcs.len(),
                        "No healthy RPC endpoint, chain unavailable"
                    );
                    *slot.last_failure.lock().await = Some(Instant::now());
                    return Err(RelayError::ChainUnavailable(chain_id));
                };
                let provider =
                    build_provider(&rpc, self.wallet.clone(), self.timing.rpc_timeout())?;
                tracing::info!(chain_id, rpc = %rpc, relayer = %self.relayer, "Chain resolved");
                Ok(ChainConnection {
                    rpc,
                    provider,
                    send_lock: Arc::new(Mutex::new(())),
                })
            })
            .await
    }

    /// Endpoint serving `chain_id`, if resolved.
    pub fn endpoint(&self, chain_id: ChainId) -> Option<&Url> {
        self.chains
            .get(&chain_id)?
            .connection
            .get()
            .map(|c| &c.rpc)
    }
}

fn http_client(timeout: Duration) -> Result<alloy::transports::http::reqwest::Client, RelayError> {
    alloy::transports::http::reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RelayError::Rpc(format!("failed to build HTTP client: {e}")))
}

/// Probes endpoints in order. Returns the first whose chain ID matches and whose latest block
/// number is above zero.
async fn resolve(chain: &ChainConfig, timing: &TransactionConfig) -> Option<Url> {
    let probe_timeout = timing.probe_timeout();

    for (i, url) in chain.rpcs.iter().enumerate() {
        let client = match http_client(probe_timeout) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "RPC #{i} probe client failed");
                continue;
            }
        };
        let probe = RootProvider::<alloy::network::Ethereum>::new(RpcClient::new(
            Http::with_client(client, url.clone()),
            false,
        ));

        let outcome = tokio::time::timeout(probe_timeout, async {
            let chain_id = probe.get_chain_id().await?;
            let block = probe.get_block_number().await?;
            Ok::<_, TransportError>((chain_id, block))
        })
        .await;

        match outcome {
            Ok(Ok((id, block))) if id == chain.chain_id && block > 0 => {
                tracing::info!(url = %url, chain_id = id, block, "RPC #{i} healthy");
                return Some(url.clone());
            }
            Ok(Ok((id, block))) => {
                tracing::warn!(
                    url = %url, expected = chain.chain_id, got = id, block,
                    "RPC #{i} rejected"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "RPC #{i} unreachable");
            }
            Err(_) => {
                tracing::warn!(url = %url, timeout_secs = probe_timeout.as_secs(), "RPC #{i} probe timed out");
            }
        }
    }
    None
}

fn build_provider(
    rpc: &Url,
    wallet: EthereumWallet,
    rpc_timeout: Duration,
) -> Result<DynProvider, RelayError> {
    let client = RpcClient::new(Http::with_client(http_client(rpc_timeout)?, rpc.clone()), false);
    Ok(ProviderBuilder::new().wallet(wallet).connect_client(client).erased())
}

#[async_trait]
impl ChainGateway for EvmGateway {
    fn relayer_address(&self) -> Address {
        self.relayer
    }

    fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    async fn read_code(&self, address: Address, chain_id: ChainId) -> Result<Bytes, RelayError> {
        let connection = self.connection(chain_id).await?;
        connection
            .provider
            .get_code_at(address)
            .into_future()
            .instrument(tracing::info_span!("get_code_at", %address, chain_id))
            .await
            .map_err(|e| categorize_rpc_error(e, "get_code_at"))
    }

    async fn balance(&self, address: Address, chain_id: ChainId) -> Result<U256, RelayError> {
        let connection = self.connection(chain_id).await?;
        connection
            .provider
            .get_balance(address)
            .into_future()
            .instrument(tracing::info_span!("get_balance", %address, chain_id))
            .await
            .map_err(|e| categorize_rpc_error(e, "get_balance"))
    }

    async fn gas_price(&self, chain_id: ChainId) -> Result<u128, RelayError> {
        let connection = self.connection(chain_id).await?;
        connection
            .provider
            .get_gas_price()
            .instrument(tracing::info_span!("get_gas_price", chain_id))
            .await
            .map_err(|e| categorize_rpc_error(e, "get_gas_price"))
    }

    async fn call(&self, tx: TransactionRequest, chain_id: ChainId) -> Result<Bytes, RelayError> {
        let connection = self.connection(chain_id).await?;
        connection
            .provider
            .call(tx)
            .into_future()
            .instrument(tracing::info_span!("eth_call", chain_id))
            .await
            .map_err(|e| categorize_rpc_error(e, "eth_call"))
    }

    #[instrument(skip_all, fields(%wallet, chain_id = chain_id))]
    async fn estimate_execution_cost(
        &self,
        wallet: Address,
        calldata: Bytes,
        chain_id: ChainId,
    ) -> Result<ExecutionEstimate, RelayError> {
        let connection = self.connection(chain_id).await?;
        let tx = TransactionRequest::default()
            .with_from(self.relayer)
            .with_to(wallet)
            .with_input(calldata);

        let gas_limit = connection
            .provider
            .estimate_gas(tx)
            .await
            .map_err(|e| categorize_rpc_error(e, "estimate_gas"))?;
        let gas_price = connection
            .provider
            .get_gas_price()
            .await
            .map_err(|e| categorize_rpc_error(e, "get_gas_price"))?;

        tracing::debug!(gas_limit, gas_price, "Execution estimated");
        Ok(ExecutionEstimate {
            gas_limit,
            gas_price,
        })
    }

    #[instrument(skip_all, fields(chain_id = chain_id))]
    async fn broadcast(
        &self,
        tx: TransactionRequest,
        chain_id: ChainId,
    ) -> Result<B256, RelayError> {
        let connection = self.connection(chain_id).await?;
        let tx = tx.with_from(self.relayer).with_chain_id(chain_id);

        let pending = {
            let _send_guard = connection.send_lock.lock().await;
            connection
                .provider
                .send_transaction(tx)
                .await
                .map_err(|e| categorize_rpc_error(e, "send_transaction"))?
        };
        let tx_hash = *pending.tx_hash();
        tracing::info!(%tx_hash, "Transaction submitted");

        let receipt = pending
            .with_required_confirmations(self.timing.confirmations)
            .with_timeout(Some(self.timing.confirmation_timeout()))
            .get_receipt()
            .await;

        match receipt {
            Ok(receipt) if receipt.status() => {
                tracing::info!(%tx_hash, block = ?receipt.block_number, "Transaction confirmed");
                Ok(tx_hash)
            }
            Ok(_) => {
                tracing::warn!(%tx_hash, "Transaction reverted on-chain");
                Err(RelayError::Rpc(format!("transaction {tx_hash} reverted")))
            }
            Err(PendingTransactionError::TxWatcher(WatchTxError::Timeout)) => {
                tracing::warn!(
                    %tx_hash,
                    timeout_secs = self.timing.confirmation_timeout_seconds,
                    "Confirmation deadline passed"
                );
                Err(RelayError::ConfirmationTimeout { tx_hash })
            }
            Err(e) => {
                tracing::warn!(%tx_hash, error = %e, "Receipt fetch failed");
                Err(RelayError::Rpc(format!("receipt for {tx_hash}: {e}")))
            }
        }
    }
}

/// Decode revert data into a human-readable message.
///
/// Supports:
/// - `Error(string)` (selector 0x08c379a0), the reason is returned as is
/// - `Panic(uint256)` (selector 0x4e487b71)
/// - Unknown selectors, returned as hex
fn decode_revert_reason(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 4 {
        return None;
    }

    if bytes[0..4] == [0x08, 0xc3, 0x79, 0xa0] && bytes.len() >= 68 {
        // offset (32) + length (32) + string data
        let len = bytes[36..68]
            .iter()
            .fold(0usize, |acc, &b| acc.saturating_mul(256).saturating_add(b as usize));
        if len <= 1024 && bytes.len() >= 68 + len {
            return String::from_utf8(bytes[68..68 + len].to_vec()).ok();
        }
    }

    if bytes[0..4] == [0x4e, 0x48, 0x7b, 0x71] && bytes.len() >= 36 {
        return Some(format!("Panic(0x{:02x})", bytes[35]));
    }

    Some(format!("UnknownError(0x{})", hex::encode(&bytes[0..4])))
}

/// Revert reason carried by a JSON-RPC error response, if any.
///
/// Prefers decoded revert data; nodes that only put the reason in the message
/// (`execution reverted: <reason>`) are handled too.
fn revert_reason(e: &TransportError) -> Option<String> {
    let payload = e.as_error_resp()?;
    if let Some(reason) = payload.as_revert_data().and_then(|data| decode_revert_reason(&data)) {
        return Some(reason);
    }
    let message = payload.message.as_ref();
    if let Some(reason) = message.strip_prefix("execution reverted: ") {
        return Some(reason.to_string());
    }
    message.contains("revert").then(|| message.to_string())
}

/// Categorize RPC errors for status mapping.
///
/// - Contract reverts -> [`RelayError::ExecutionWouldRevert`] with the decoded reason
/// - Everything else -> [`RelayError::Rpc`], connection failures tagged as such
fn categorize_rpc_error(e: TransportError, context: &str) -> RelayError {
    if let Some(reason) = revert_reason(&e) {
        tracing::warn!("{context}: Contract reverted: {reason}");
        return RelayError::ExecutionWouldRevert(reason);
    }

    let err_str = format!("{e:?}");
    if err_str.contains("Connection refused")
        || err_str.contains("Connection reset")
        || err_str.contains("No route to host")
        || err_str.contains("timeout")
        || err_str.contains("Timeout")
        || err_str.contains("dns error")
    {
        tracing::error!("{context}: RPC connection error: {err_str}");
        RelayError::Rpc(format!("{context}: connection error"))
    } else {
        tracing::error!("{context}: RPC call failed: {err_str}");
        RelayError::Rpc(format!("{context} failed"))
    }
}
