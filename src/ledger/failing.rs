//! Ledger backend whose writes always fail, for exercising the best-effort write path.

use async_trait::async_trait;

use super::api::Result;
use super::{LedgerApi, LedgerError, LedgerQuery, LedgerRecord};

#[derive(Debug, Default)]
pub struct FailingLedger;

#[async_trait]
impl LedgerApi for FailingLedger {
    async fn create_schema_if_absent(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, _record: &LedgerRecord) -> Result<()> {
        Err(LedgerError::Persistence("connection closed".to_string()))
    }

    async fn query(&self, _query: &LedgerQuery) -> Result<Vec<LedgerRecord>> {
        Ok(vec![])
    }
}
