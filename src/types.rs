//! Wire and domain types shared by the builder, the codec and the relay server.

use alloy::primitives::{Address, Bytes, ChainId, U256};
use alloy::rpc::types::TransactionRequest;
use serde::{Deserialize, Deserializer, Serialize};

pub use crate::contracts::UserOp;

/// Transaction hash reported when the execution transaction was prepared but not sent.
pub const TX_HASH_PLACEHOLDER: &str = "0x0";

/// A smart wallet as seen on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartWallet {
    pub owner: Address,
    /// Deployment index passed to the factory. Owners may hold several wallets.
    pub index: U256,
    pub address: Address,
    pub deployed: bool,
    /// Execution nonce, 0 while undeployed.
    pub nonce: U256,
}

/// An ordered operation batch. Element 0 is the relayer fee payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBatch {
    pub ops: Vec<UserOp>,
    pub wallet: Address,
    /// Wallet nonce observed when the batch was built.
    pub nonce: U256,
    /// Chain the batch executes on.
    pub chain_id: ChainId,
    /// Chain the signature is scoped to. `None` until signed.
    pub scope_chain_id: Option<ChainId>,
    /// ABI-encoded signature envelope, empty until signed.
    pub envelope: Bytes,
}

impl OperationBatch {
    pub fn is_signed(&self) -> bool {
        !self.envelope.is_empty()
    }

    /// Wire form posted to the relay server.
    pub fn to_signed_transaction(&self) -> SignedTransaction {
        SignedTransaction {
            user_ops: self.ops.clone(),
            chain_id: self.chain_id,
            signature: self.envelope.clone(),
        }
    }
}

/// Wire form of a signed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    #[serde(rename = "userOps")]
    pub user_ops: Vec<UserOp>,
    #[serde(rename = "chainID")]
    pub chain_id: ChainId,
    /// Encoded signature envelope.
    pub signature: Bytes,
}

/// Body of `POST /transactions/{address}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub send_internally: bool,
    pub transaction: SignedTransaction,
}

/// Result of a relay submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub exec_tx: TransactionRequest,
    pub tx_hash: String,
}

/// Accepts `true`, `false`, `"true"` and `"false"`. Any other string counts as false.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// Input of the client-side batch builder.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub owner: Address,
    pub index: U256,
    /// Recipient as typed by the user, parsed by the builder.
    pub recipient: String,
    /// Total amount leaving the wallet, fee included.
    pub amount: U256,
    /// Native asset symbol, used in error messages.
    pub asset: String,
    pub chain_id: ChainId,
}
