//! Client-side construction of a fee-paying operation batch.

use alloy::primitives::{Address, Bytes, ChainId, U256};
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::ChainGateway;
use crate::error::RelayError;
use crate::types::{OperationBatch, TransferRequest, UserOp};
use crate::wallet::WalletResolver;

/// Splits a transfer into a relayer fee payment followed by the payload transfer.
///
/// The fee is quoted with a conservative gas limit, so it normally exceeds the relay server's
/// own estimate and the batch is accepted.
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    gateway: Arc<dyn ChainGateway>,
    resolver: WalletResolver,
    client_gas_limit: u64,
}

impl OperationBuilder {
    pub fn new(gateway: Arc<dyn ChainGateway>, resolver: WalletResolver, client_gas_limit: u64) -> Self {
        Self {
            gateway,
            resolver,
            client_gas_limit,
        }
    }

    /// Fee offered to the relayer for one batch: current gas price times the client gas limit.
    pub async fn quote_fee(&self, chain_id: ChainId) -> Result<U256, RelayError> {
        let gas_price = self.gateway.gas_price(chain_id).await?;
        Ok(U256::from(gas_price) * U256::from(self.client_gas_limit))
    }

    /// Builds the unsigned batch: `[fee payment to relayer, transfer to recipient]`.
    #[instrument(skip_all, fields(owner = %request.owner, chain_id = request.chain_id))]
    pub async fn build(&self, request: &TransferRequest) -> Result<OperationBatch, RelayError> {
        if !self.gateway.supports(request.chain_id) {
            return Err(RelayError::UnsupportedChain(request.chain_id));
        }

        let recipient = Address::from_str(request.recipient.trim())
            .map_err(|_| RelayError::InvalidRecipient(request.recipient.clone()))?;

        let wallet = self
            .resolver
            .wallet(request.owner, request.index, request.chain_id)
            .await?;
        let balance = self.gateway.balance(wallet.address, request.chain_id).await?;
        if balance < request.amount {
            return Err(RelayError::InsufficientBalance {
                balance,
                required: request.amount,
            });
        }

        let gas_cost = self.quote_fee(request.chain_id).await?;
        if request.amount <= gas_cost {
            return Err(RelayError::InsufficientAmount {
                minimum: gas_cost,
                asset: request.asset.clone(),
            });
        }
        let receive = request.amount - gas_cost;

        tracing::debug!(
            wallet = %wallet.address,
            %gas_cost,
            %receive,
            nonce = %wallet.nonce,
            "Batch built"
        );

        Ok(OperationBatch {
            ops: vec![
                UserOp {
                    to: self.gateway.relayer_address(),
                    amount: gas_cost,
                    data: Bytes::new(),
                },
                UserOp {
                    to: recipient,
                    amount: receive,
                    data: Bytes::new(),
                },
            ],
            wallet: wallet.address,
            nonce: wallet.nonce,
            chain_id: request.chain_id,
            scope_chain_id: None,
            envelope: Bytes::new(),
        })
    }
}
