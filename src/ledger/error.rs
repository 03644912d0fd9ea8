/// Errors returned by the transaction ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A filter key outside `{id, address, chainID}` or a value that does not parse.
    #[error("Invalid filters: {0}")]
    InvalidFilter(String),
    /// A record with this transaction hash already exists.
    #[error("Transaction {0} already recorded")]
    DuplicateTransaction(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Persistence(e.to_string())
    }
}
