//! Ledger implementation using a PostgreSQL database.

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::str::FromStr;
use tracing::instrument;

use super::api::{LedgerApi, LedgerQuery, LedgerRecord, Result};
use super::LedgerError;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS smart_wallet_txns (
    id TEXT NOT NULL,
    address TEXT NOT NULL,
    wallet TEXT NOT NULL,
    "userOps" TEXT NOT NULL,
    "chainID" BIGINT NOT NULL,
    signature TEXT NOT NULL,
    "txHash" TEXT PRIMARY KEY
)
"#;

/// PostgreSQL ledger. Addresses are stored checksummed so equality filters are exact.
#[derive(Debug)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

fn decode_row(row: &PgRow) -> Result<LedgerRecord> {
    let parse_address = |column: &str| -> Result<Address> {
        let raw: String = row.try_get(column)?;
        Address::from_str(&raw)
            .map_err(|e| LedgerError::Persistence(format!("bad {column} {raw:?}: {e}")))
    };
    let user_ops: String = row.try_get("userOps")?;
    let chain_id: i64 = row.try_get("chainID")?;
    let signature: String = row.try_get("signature")?;

    Ok(LedgerRecord {
        id: row.try_get("id")?,
        address: parse_address("address")?,
        wallet: parse_address("wallet")?,
        user_ops: serde_json::from_str(&user_ops)?,
        chain_id: u64::try_from(chain_id)
            .map_err(|_| LedgerError::Persistence(format!("negative chainID {chain_id}")))?,
        signature: Bytes::from_str(&signature)
            .map_err(|e| LedgerError::Persistence(format!("bad signature: {e}")))?,
        tx_hash: row.try_get("txHash")?,
    })
}

#[async_trait]
impl LedgerApi for PgLedger {
    #[instrument(skip_all)]
    async fn create_schema_if_absent(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(tx_hash = %record.tx_hash))]
    async fn insert(&self, record: &LedgerRecord) -> Result<()> {
        let result = sqlx::query(
            r#"INSERT INTO smart_wallet_txns (id, address, wallet, "userOps", "chainID", signature, "txHash")
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&record.id)
        .bind(record.address.to_checksum(None))
        .bind(record.wallet.to_checksum(None))
        .bind(serde_json::to_string(&record.user_ops)?)
        .bind(record.chain_id as i64)
        .bind(record.signature.to_string())
        .bind(&record.tx_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(LedgerError::DuplicateTransaction(record.tx_hash.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all)]
    async fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerRecord>> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            r#"SELECT id, address, wallet, "userOps", "chainID", signature, "txHash" FROM smart_wallet_txns WHERE TRUE"#,
        );
        if let Some(id) = &query.id {
            builder.push(" AND id = ").push_bind(id.clone());
        }
        if let Some(address) = query.address {
            builder.push(" AND address = ").push_bind(address.to_checksum(None));
        }
        if let Some(chain_id) = query.chain_id {
            builder.push(r#" AND "chainID" = "#).push_bind(chain_id as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }
}
