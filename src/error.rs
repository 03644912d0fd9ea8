use alloy::primitives::{Address, B256, ChainId, U256};

use crate::ledger::LedgerError;

/// Errors produced while building, signing, relaying or recording an operation batch.
///
/// HTTP status mapping lives in [`crate::handlers`].
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No configured RPC endpoint for the chain answered the probe.
    #[error("Chain {0} is unavailable")]
    ChainUnavailable(ChainId),
    #[error("Unsupported chain {0}")]
    UnsupportedChain(ChainId),
    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: U256, required: U256 },
    /// The requested transfer does not cover the relayer fee.
    #[error("Minimum amount is {minimum} {asset}")]
    InsufficientAmount { minimum: U256, asset: String },
    #[error("Insufficient fee payment: paid {paid}, required {required}")]
    InsufficientFee { paid: U256, required: U256 },
    #[error("Operation batch is empty")]
    EmptyBatch,
    /// The factory deploys an owner's wallets in index order and `index` is not the next one.
    #[error("Wallet {index} of {owner} cannot be deployed on chain {chain_id} before the previous one")]
    WalletIndexUnavailable {
        owner: Address,
        index: U256,
        chain_id: ChainId,
    },
    /// The deployment was confirmed but the wallet still has no code.
    #[error("Wallet {wallet} has no code on chain {chain_id}")]
    WalletNotDeployed { wallet: Address, chain_id: ChainId },
    #[error("Malformed signature envelope: {0}")]
    MalformedEnvelope(String),
    /// Simulation reverted. The reason is the contract's message, unmodified.
    #[error("{0}")]
    ExecutionWouldRevert(String),
    /// The transaction was broadcast but not confirmed before the deadline. It may still land.
    #[error("Transaction {tx_hash} was not confirmed in time")]
    ConfirmationTimeout { tx_hash: B256 },
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<alloy::signers::Error> for RelayError {
    fn from(e: alloy::signers::Error) -> Self {
        RelayError::Signing(e.to_string())
    }
}
