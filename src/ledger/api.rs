//! Ledger api.

use alloy::primitives::{Address, Bytes, ChainId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use super::LedgerError;
use crate::types::UserOp;

/// Type alias for `Result<T, LedgerError>`
pub type Result<T> = core::result::Result<T, LedgerError>;

/// One submitted batch. Created once, never updated or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Wallet deployment index, as a decimal string.
    pub id: String,
    /// Wallet owner.
    pub address: Address,
    pub wallet: Address,
    #[serde(rename = "userOps")]
    pub user_ops: Vec<UserOp>,
    #[serde(rename = "chainID")]
    pub chain_id: ChainId,
    /// Encoded signature envelope.
    pub signature: Bytes,
    /// Primary key. The placeholder `0x0` for batches that were prepared but not sent.
    #[serde(rename = "txHash")]
    pub tx_hash: String,
}

/// Validated query filters. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerQuery {
    pub id: Option<String>,
    pub address: Option<Address>,
    pub chain_id: Option<ChainId>,
}

impl LedgerQuery {
    pub fn matches(&self, record: &LedgerRecord) -> bool {
        self.id.as_ref().is_none_or(|id| *id == record.id)
            && self.address.is_none_or(|address| address == record.address)
            && self.chain_id.is_none_or(|chain_id| chain_id == record.chain_id)
    }
}

/// Storage engine behind the ledger.
#[async_trait]
pub trait LedgerApi: Debug + Send + Sync {
    /// Provisions the record table. Safe to call repeatedly.
    async fn create_schema_if_absent(&self) -> Result<()>;

    /// Appends a record. Fails with [`LedgerError::DuplicateTransaction`] if the hash exists.
    async fn insert(&self, record: &LedgerRecord) -> Result<()>;

    /// Records matching every set filter.
    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerRecord>>;
}
