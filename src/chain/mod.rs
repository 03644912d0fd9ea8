//! Chain access used by the wallet resolver and the relay.
//!
//! [`ChainGateway`] is the seam between relay logic and RPC nodes. [`evm::EvmGateway`] talks
//! to real endpoints; tests use [`mock::MockGateway`].

use alloy::primitives::{Address, B256, Bytes, ChainId, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::RelayError;

pub mod evm;
#[cfg(test)]
pub mod mock;

/// Authoritative gas estimate for an execution transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionEstimate {
    pub gas_limit: u64,
    pub gas_price: u128,
}

impl ExecutionEstimate {
    /// Native amount the relayer spends to land the transaction.
    pub fn cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.gas_price)
    }
}

#[async_trait]
pub trait ChainGateway: Debug + Send + Sync {
    /// Address of the relayer key, identical on every chain.
    fn relayer_address(&self) -> Address;

    /// Configured chains, resolved or not.
    fn chain_ids(&self) -> Vec<ChainId>;

    fn supports(&self, chain_id: ChainId) -> bool {
        self.chain_ids().contains(&chain_id)
    }

    /// Contract code at `address`. Empty means nothing is deployed.
    async fn read_code(&self, address: Address, chain_id: ChainId) -> Result<Bytes, RelayError>;

    /// Native balance of `address`.
    async fn balance(&self, address: Address, chain_id: ChainId) -> Result<U256, RelayError>;

    async fn gas_price(&self, chain_id: ChainId) -> Result<u128, RelayError>;

    /// Read-only `eth_call`.
    async fn call(&self, tx: TransactionRequest, chain_id: ChainId) -> Result<Bytes, RelayError>;

    /// Simulates `calldata` sent by the relayer to `wallet` and prices it.
    ///
    /// A revert fails with [`RelayError::ExecutionWouldRevert`] carrying the contract's reason.
    async fn estimate_execution_cost(
        &self,
        wallet: Address,
        calldata: Bytes,
        chain_id: ChainId,
    ) -> Result<ExecutionEstimate, RelayError>;

    /// Signs `tx` with the relayer key, sends it and waits for the configured confirmations.
    ///
    /// When the confirmation deadline passes, fails with [`RelayError::ConfirmationTimeout`]
    /// carrying the hash of the transaction that was sent.
    async fn broadcast(&self, tx: TransactionRequest, chain_id: ChainId)
    -> Result<B256, RelayError>;
}
