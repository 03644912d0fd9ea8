//! Append-only record of submitted batches.

mod api;
pub use api::{LedgerApi, LedgerQuery, LedgerRecord};
mod error;
pub use error::LedgerError;
#[cfg(test)]
pub mod failing;
mod memory;
pub use memory::InMemoryLedger;
mod pg;
pub use pg::PgLedger;
mod writer;
pub use writer::{LedgerWriter, WriterStats};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// Raw query filters, as received over HTTP.
pub type LedgerFilters = BTreeMap<String, String>;

/// Keys a ledger query may filter on.
pub const FILTER_KEYS: [&str; 3] = ["id", "address", "chainID"];

/// How the ledger writer treats a record whose transaction hash is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Count the duplicate as a failed write.
    #[default]
    Reject,
    /// Treat the duplicate as an idempotent success.
    Ignore,
}

/// Checks filter keys and parses their values. Never touches storage.
pub fn validate_filters(filters: &LedgerFilters) -> Result<LedgerQuery, LedgerError> {
    if let Some(key) = filters.keys().find(|k| !FILTER_KEYS.contains(&k.as_str())) {
        return Err(LedgerError::InvalidFilter(format!("unsupported key {key:?}")));
    }

    let address = filters
        .get("address")
        .map(|raw| {
            Address::from_str(raw)
                .map_err(|_| LedgerError::InvalidFilter(format!("address {raw:?} is not an address")))
        })
        .transpose()?;
    let chain_id = filters
        .get("chainID")
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| LedgerError::InvalidFilter(format!("chainID {raw:?} is not an integer")))
        })
        .transpose()?;

    Ok(LedgerQuery {
        id: filters.get("id").cloned(),
        address,
        chain_id,
    })
}

/// Ledger handle shared across the server.
#[derive(Debug, Clone)]
pub struct Ledger {
    inner: Arc<dyn LedgerApi>,
}

impl Ledger {
    pub fn new(inner: Arc<dyn LedgerApi>) -> Self {
        Self { inner }
    }

    /// Create a [`Ledger`] with an in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLedger::default()))
    }

    pub fn postgres(ledger: PgLedger) -> Self {
        Self::new(Arc::new(ledger))
    }

    /// Validates `filters`, then runs the query.
    pub async fn query_filters(&self, filters: &LedgerFilters) -> Result<Vec<LedgerRecord>, LedgerError> {
        let query = validate_filters(filters)?;
        self.inner.query(&query).await
    }
}

#[async_trait]
impl LedgerApi for Ledger {
    async fn create_schema_if_absent(&self) -> api::Result<()> {
        self.inner.create_schema_if_absent().await
    }

    async fn insert(&self, record: &LedgerRecord) -> api::Result<()> {
        self.inner.insert(record).await
    }

    async fn query(&self, query: &LedgerQuery) -> api::Result<Vec<LedgerRecord>> {
        self.inner.query(query).await
    }
}
