//! Smart wallet address resolution, deployment and nonce lookup.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, ChainId, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::instrument;

use crate::chain::ChainGateway;
use crate::contracts::{IWallet, IWalletFactory};
use crate::error::RelayError;
use crate::types::SmartWallet;

type LockKey = (Address, ChainId);
type LockMap = Arc<DashMap<LockKey, Arc<Mutex<()>>>>;

/// Held lock of a [`WalletResolver`] lock map.
///
/// Dropping it releases the lock and removes the map entry once no other task holds or waits
/// on it, so the maps only hold keys that are in use.
#[derive(Debug)]
pub struct WalletGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
    key: LockKey,
}

impl Drop for WalletGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Nonces of one wallet across the configured chains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletNonces {
    pub address: Address,
    pub nonces: BTreeMap<ChainId, U256>,
    /// Chains whose lookup failed, with the reason.
    pub failed: BTreeMap<ChainId, String>,
}

#[derive(Debug, Clone)]
pub struct WalletResolver {
    gateway: Arc<dyn ChainGateway>,
    factory: Address,
    default_chain_id: ChainId,
    /// Per-(wallet, chain) submission locks. Held from validation until the execution
    /// transaction is sent or prepared.
    locks: LockMap,
    /// Per-(owner, chain) deployment locks. The factory numbers an owner's wallets, so all of
    /// an owner's deployments on a chain go one at a time.
    deploy_locks: LockMap,
}

impl WalletResolver {
    pub fn new(gateway: Arc<dyn ChainGateway>, factory: Address, default_chain_id: ChainId) -> Self {
        Self {
            gateway,
            factory,
            default_chain_id,
            locks: Arc::new(DashMap::new()),
            deploy_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn default_chain_id(&self) -> ChainId {
        self.default_chain_id
    }

    /// Deterministic wallet address from the factory. Identical before and after deployment.
    pub async fn compute_address(
        &self,
        owner: Address,
        index: U256,
        chain_id: ChainId,
    ) -> Result<Address, RelayError> {
        let input = IWalletFactory::walletAddressCall {
            owner,
            nonce: index,
        }
        .abi_encode();
        let tx = TransactionRequest::default()
            .with_to(self.factory)
            .with_input(input);

        let output = self.gateway.call(tx, chain_id).await?;
        IWalletFactory::walletAddressCall::abi_decode_returns(&output)
            .map_err(|e| RelayError::Rpc(format!("walletAddress returned malformed data: {e}")))
    }

    /// Deploys the wallet through the factory unless code is already present.
    ///
    /// `createWallet(owner)` deploys the owner's next wallet, so wallet `index` can only be
    /// deployed once wallet `index - 1` exists. Returns the wallet address, which is guaranteed
    /// to hold code on success.
    #[instrument(skip_all, fields(%owner, %index, chain_id = chain_id))]
    pub async fn ensure_deployed(
        &self,
        owner: Address,
        index: U256,
        chain_id: ChainId,
    ) -> Result<Address, RelayError> {
        let wallet = self.compute_address(owner, index, chain_id).await?;

        let _deploy_guard = acquire(&self.deploy_locks, (owner, chain_id)).await;

        if !self.gateway.read_code(wallet, chain_id).await?.is_empty() {
            tracing::debug!(%wallet, "Wallet already deployed");
            return Ok(wallet);
        }

        if index > U256::ZERO {
            let previous = self
                .compute_address(owner, index - U256::from(1u8), chain_id)
                .await?;
            if self.gateway.read_code(previous, chain_id).await?.is_empty() {
                tracing::info!(%wallet, %previous, "Previous wallet not deployed, refusing");
                return Err(RelayError::WalletIndexUnavailable {
                    owner,
                    index,
                    chain_id,
                });
            }
        }

        tracing::info!(%wallet, "Deploying wallet");
        let tx = TransactionRequest::default()
            .with_to(self.factory)
            .with_input(IWalletFactory::createWalletCall { owner }.abi_encode());
        let tx_hash = self.gateway.broadcast(tx, chain_id).await?;

        if self.gateway.read_code(wallet, chain_id).await?.is_empty() {
            tracing::error!(%wallet, %tx_hash, "Deployment confirmed but wallet has no code");
            return Err(RelayError::WalletNotDeployed { wallet, chain_id });
        }
        tracing::info!(%wallet, %tx_hash, "Wallet deployed");
        Ok(wallet)
    }

    /// Wallet execution nonce, 0 while undeployed.
    pub async fn current_nonce(&self, wallet: Address, chain_id: ChainId) -> Result<U256, RelayError> {
        current_nonce(self.gateway.as_ref(), wallet, chain_id).await
    }

    /// Address, deployment state and nonce of an owner's wallet on one chain.
    pub async fn wallet(
        &self,
        owner: Address,
        index: U256,
        chain_id: ChainId,
    ) -> Result<SmartWallet, RelayError> {
        let address = self.compute_address(owner, index, chain_id).await?;
        let deployed = !self.gateway.read_code(address, chain_id).await?.is_empty();
        let nonce = if deployed {
            read_nonce(self.gateway.as_ref(), address, chain_id).await?
        } else {
            U256::ZERO
        };
        Ok(SmartWallet {
            owner,
            index,
            address,
            deployed,
            nonce,
        })
    }

    /// Nonce of the owner's wallet on every configured chain.
    ///
    /// Lookups run concurrently and all of them finish before this returns. A chain whose
    /// lookup fails is reported in [`WalletNonces::failed`]; only failing to derive the address
    /// on every chain is an error.
    pub async fn nonces(&self, owner: Address, index: U256) -> Result<WalletNonces, RelayError> {
        let wallet = self.derive_address(owner, index).await?;
        let chain_ids = self.gateway.chain_ids();

        let mut lookups = JoinSet::new();
        for chain_id in chain_ids.iter().copied() {
            let gateway = Arc::clone(&self.gateway);
            lookups.spawn(async move {
                let nonce = current_nonce(gateway.as_ref(), wallet, chain_id).await;
                (chain_id, nonce)
            });
        }

        let mut result = WalletNonces {
            address: wallet,
            ..Default::default()
        };
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((chain_id, Ok(nonce))) => {
                    result.nonces.insert(chain_id, nonce);
                }
                Ok((chain_id, Err(e))) => {
                    tracing::warn!(%wallet, chain_id, error = %e, "Nonce lookup failed");
                    result.failed.insert(chain_id, e.to_string());
                }
                Err(e) => {
                    tracing::error!(%wallet, error = %e, "Nonce lookup aborted");
                }
            }
        }
        for chain_id in chain_ids {
            if !result.nonces.contains_key(&chain_id) {
                result
                    .failed
                    .entry(chain_id)
                    .or_insert_with(|| "lookup aborted".to_string());
            }
        }

        Ok(result)
    }

    /// Derives the wallet address on the default chain, falling back to the other chains.
    async fn derive_address(&self, owner: Address, index: U256) -> Result<Address, RelayError> {
        let fallbacks = self
            .gateway
            .chain_ids()
            .into_iter()
            .filter(|id| *id != self.default_chain_id);

        let mut last_error = None;
        for chain_id in std::iter::once(self.default_chain_id).chain(fallbacks) {
            match self.compute_address(owner, index, chain_id).await {
                Ok(address) => return Ok(address),
                Err(e) => {
                    tracing::warn!(%owner, chain_id, error = %e, "Address derivation failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(RelayError::UnsupportedChain(self.default_chain_id)))
    }

    /// Acquires the submission lock of `(wallet, chain_id)`.
    pub async fn lock(&self, wallet: Address, chain_id: ChainId) -> WalletGuard {
        tracing::debug!(%wallet, chain_id, "acquiring wallet lock");
        let guard = acquire(&self.locks, (wallet, chain_id)).await;
        tracing::debug!(%wallet, chain_id, "wallet lock acquired");
        guard
    }
}

async fn acquire(locks: &LockMap, key: LockKey) -> WalletGuard {
    let lock = Arc::clone(
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value(),
    );
    let guard = lock.lock_owned().await;
    WalletGuard {
        guard: Some(guard),
        locks: Arc::clone(locks),
        key,
    }
}

async fn current_nonce(
    gateway: &dyn ChainGateway,
    wallet: Address,
    chain_id: ChainId,
) -> Result<U256, RelayError> {
    if gateway.read_code(wallet, chain_id).await?.is_empty() {
        return Ok(U256::ZERO);
    }
    read_nonce(gateway, wallet, chain_id).await
}

async fn read_nonce(
    gateway: &dyn ChainGateway,
    wallet: Address,
    chain_id: ChainId,
) -> Result<U256, RelayError> {
    let tx = TransactionRequest::default()
        .with_to(wallet)
        .with_input(IWallet::nonceCall {}.abi_encode());
    let output = gateway.call(tx, chain_id).await?;
    IWallet::nonceCall::abi_decode_returns(&output)
        .map_err(|e| RelayError::Rpc(format!("nonce returned malformed data: {e}")))
}
