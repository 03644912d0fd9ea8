//! Server-side relay of signed operation batches.
//!
//! A submission moves through [`SubmissionStage`]s while holding the `(wallet, chain)` lock:
//! the wallet is deployed if needed, the batch is priced and simulated from the relayer, the
//! fee payment is checked against that price and the `exec` transaction is built. It is then
//! broadcast or returned unsent, and handed to the ledger writer.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::ChainGateway;
use crate::contracts::IWallet;
use crate::error::RelayError;
use crate::ledger::{LedgerRecord, LedgerWriter};
use crate::signature::decode_envelope;
use crate::types::{SignedTransaction, SubmitResponse, TX_HASH_PLACEHOLDER};
use crate::wallet::WalletResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStage {
    Received,
    WalletResolved,
    FeeValidated,
    Simulated,
    Broadcast,
    PreparedOnly,
    Logged,
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmissionStage::Received => "received",
            SubmissionStage::WalletResolved => "wallet_resolved",
            SubmissionStage::FeeValidated => "fee_validated",
            SubmissionStage::Simulated => "simulated",
            SubmissionStage::Broadcast => "broadcast",
            SubmissionStage::PreparedOnly => "prepared_only",
            SubmissionStage::Logged => "logged",
        };
        f.write_str(name)
    }
}

/// A batch submission as received by the relay server.
#[derive(Debug, Clone)]
pub struct Submission {
    pub owner: Address,
    pub index: U256,
    pub transaction: SignedTransaction,
    pub send_internally: bool,
}

#[derive(Debug, Clone)]
pub struct RelaySubmitter {
    gateway: Arc<dyn ChainGateway>,
    resolver: WalletResolver,
    writer: LedgerWriter,
}

impl RelaySubmitter {
    pub fn new(gateway: Arc<dyn ChainGateway>, resolver: WalletResolver, writer: LedgerWriter) -> Self {
        Self {
            gateway,
            resolver,
            writer,
        }
    }

    #[instrument(skip_all, fields(
        owner = %submission.owner,
        chain_id = submission.transaction.chain_id,
        ops = submission.transaction.user_ops.len()
    ))]
    pub async fn submit(&self, submission: Submission) -> Result<SubmitResponse, RelayError> {
        let Submission {
            owner,
            index,
            transaction,
            send_internally,
        } = submission;
        let chain_id = transaction.chain_id;
        stage(SubmissionStage::Received);

        if transaction.user_ops.is_empty() {
            return Err(RelayError::EmptyBatch);
        }
        if !self.gateway.supports(chain_id) {
            return Err(RelayError::UnsupportedChain(chain_id));
        }
        let (scope_chain_id, _) = decode_envelope(&transaction.signature)?;
        tracing::debug!(scope_chain_id, "Envelope decoded");

        let wallet = self.resolver.compute_address(owner, index, chain_id).await?;
        let _wallet_guard = self.resolver.lock(wallet, chain_id).await;

        self.resolver.ensure_deployed(owner, index, chain_id).await?;
        stage(SubmissionStage::WalletResolved);

        let calldata = IWallet::execCall {
            userOps: transaction.user_ops.clone(),
            signature: transaction.signature.clone(),
        }
        .abi_encode();
        let estimate = self
            .gateway
            .estimate_execution_cost(wallet, calldata.clone().into(), chain_id)
            .await?;

        let relayer = self.gateway.relayer_address();
        let fee = &transaction.user_ops[0];
        let required = estimate.cost();
        if fee.to == relayer && fee.amount < required {
            tracing::info!(paid = %fee.amount, %required, "Fee below estimate");
            return Err(RelayError::InsufficientFee {
                paid: fee.amount,
                required,
            });
        }
        stage(SubmissionStage::FeeValidated);
        stage(SubmissionStage::Simulated);

        let exec_tx = TransactionRequest::default()
            .with_from(relayer)
            .with_to(wallet)
            .with_input(calldata)
            .with_chain_id(chain_id)
            .with_gas_limit(estimate.gas_limit)
            .with_gas_price(estimate.gas_price);

        let tx_hash = if send_internally {
            match self.gateway.broadcast(exec_tx.clone(), chain_id).await {
                Ok(hash) => {
                    stage(SubmissionStage::Broadcast);
                    hash.to_string()
                }
                Err(RelayError::ConfirmationTimeout { tx_hash }) => {
                    // may still land, so it is recorded all the same
                    self.record(owner, index, wallet, &transaction, tx_hash.to_string());
                    return Err(RelayError::ConfirmationTimeout { tx_hash });
                }
                Err(e) => return Err(e),
            }
        } else {
            stage(SubmissionStage::PreparedOnly);
            TX_HASH_PLACEHOLDER.to_string()
        };

        self.record(owner, index, wallet, &transaction, tx_hash.clone());
        stage(SubmissionStage::Logged);

        tracing::info!(%wallet, %tx_hash, send_internally, "Batch relayed");
        Ok(SubmitResponse { exec_tx, tx_hash })
    }

    fn record(
        &self,
        owner: Address,
        index: U256,
        wallet: Address,
        transaction: &SignedTransaction,
        tx_hash: String,
    ) {
        self.writer.submit(LedgerRecord {
            id: index.to_string(),
            address: owner,
            wallet,
            user_ops: transaction.user_ops.clone(),
            chain_id: transaction.chain_id,
            signature: transaction.signature.clone(),
            tx_hash,
        });
    }
}

fn stage(stage: SubmissionStage) {
    tracing::debug!(%stage, "Submission stage");
}
