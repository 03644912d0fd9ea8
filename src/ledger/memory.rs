//! Ledger implementation in-memory. Used by tests and single-node deployments without a database.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

use super::api::{LedgerApi, LedgerQuery, LedgerRecord, Result};
use super::LedgerError;

/// [`LedgerApi`] implementation in-memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    /// Records by transaction hash, with their insertion sequence.
    records: DashMap<String, (u64, LedgerRecord)>,
    sequence: AtomicU64,
}

#[async_trait]
impl LedgerApi for InMemoryLedger {
    async fn create_schema_if_absent(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, record: &LedgerRecord) -> Result<()> {
        match self.records.entry(record.tx_hash.clone()) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateTransaction(record.tx_hash.clone())),
            Entry::Vacant(slot) => {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                slot.insert((seq, record.clone()));
                Ok(())
            }
        }
    }

    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerRecord>> {
        let mut matching: Vec<_> = self
            .records
            .iter()
            .filter(|entry| query.matches(&entry.value().1))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);
        Ok(matching.into_iter().map(|(_, record)| record).collect())
    }
}
