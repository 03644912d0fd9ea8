//! Deterministic in-process chain used by tests.

use alloy::primitives::{Address, B256, Bytes, ChainId, U256, keccak256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ChainGateway, ExecutionEstimate};
use crate::contracts::{IWallet, IWalletFactory};
use crate::error::RelayError;

#[derive(Debug, Default)]
struct MockState {
    code: HashMap<(Address, ChainId), Bytes>,
    balances: HashMap<(Address, ChainId), U256>,
    nonces: HashMap<(Address, ChainId), U256>,
    gas_price: u128,
    gas_limit: u64,
    revert: Option<String>,
    confirmation_timeout: bool,
    /// `createWallet` confirms without leaving code behind.
    deployments_hidden: bool,
    broadcasts: Vec<(ChainId, TransactionRequest)>,
    sent: u64,
}

/// Chain state held in memory. The factory deploys wallets at [`MockGateway::wallet_for`],
/// `exec` bumps the wallet nonce and every broadcast is recorded.
#[derive(Debug)]
pub struct MockGateway {
    relayer: Address,
    factory: Address,
    chains: Vec<ChainId>,
    unavailable: Vec<ChainId>,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(relayer: Address, factory: Address, chains: Vec<ChainId>) -> Self {
        Self {
            relayer,
            factory,
            chains,
            unavailable: vec![],
            state: Mutex::new(MockState {
                gas_price: 20,
                gas_limit: 250_000,
                ..Default::default()
            }),
        }
    }

    /// Marks a configured chain as having no healthy endpoint.
    pub fn with_unavailable(mut self, chain_id: ChainId) -> Self {
        if !self.chains.contains(&chain_id) {
            self.chains.push(chain_id);
        }
        self.unavailable.push(chain_id);
        self
    }

    /// Counterfactual wallet address, a pure function of owner and index.
    pub fn wallet_for(owner: Address, index: U256) -> Address {
        Address::from_word(keccak256((owner, index).abi_encode()))
    }

    pub fn set_gas(&self, gas_price: u128, gas_limit: u64) {
        let mut state = self.state.lock().unwrap();
        state.gas_price = gas_price;
        state.gas_limit = gas_limit;
    }

    pub fn set_balance(&self, address: Address, chain_id: ChainId, balance: U256) {
        self.state.lock().unwrap().balances.insert((address, chain_id), balance);
    }

    pub fn set_revert(&self, reason: Option<&str>) {
        self.state.lock().unwrap().revert = reason.map(str::to_string);
    }

    pub fn set_confirmation_timeout(&self, timeout: bool) {
        self.state.lock().unwrap().confirmation_timeout = timeout;
    }

    pub fn set_deployments_hidden(&self, hidden: bool) {
        self.state.lock().unwrap().deployments_hidden = hidden;
    }

    pub fn deploy(&self, wallet: Address, chain_id: ChainId) {
        self.state
            .lock()
            .unwrap()
            .code
            .insert((wallet, chain_id), Bytes::from_static(&[0x60, 0x80]));
    }

    pub fn set_nonce(&self, wallet: Address, chain_id: ChainId, nonce: U256) {
        self.state.lock().unwrap().nonces.insert((wallet, chain_id), nonce);
    }

    pub fn broadcasts(&self) -> Vec<(ChainId, TransactionRequest)> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    fn check(&self, chain_id: ChainId) -> Result<(), RelayError> {
        if self.unavailable.contains(&chain_id) {
            return Err(RelayError::ChainUnavailable(chain_id));
        }
        if !self.chains.contains(&chain_id) {
            return Err(RelayError::UnsupportedChain(chain_id));
        }
        Ok(())
    }

    fn apply(&self, state: &mut MockState, tx: &TransactionRequest, chain_id: ChainId) {
        let to = tx.to.and_then(|kind| kind.to().copied()).unwrap_or_default();
        let input = tx.input.input().cloned().unwrap_or_default();

        if to == self.factory {
            if state.deployments_hidden {
                return;
            }
            if let Ok(call) = IWalletFactory::createWalletCall::abi_decode(&input) {
                // next free index for this owner
                let mut index = U256::ZERO;
                while state
                    .code
                    .contains_key(&(Self::wallet_for(call.owner, index), chain_id))
                {
                    index += U256::from(1);
                }
                state.code.insert(
                    (Self::wallet_for(call.owner, index), chain_id),
                    Bytes::from_static(&[0x60, 0x80]),
                );
            }
        } else if IWallet::execCall::abi_decode(&input).is_ok() {
            *state.nonces.entry((to, chain_id)).or_default() += U256::from(1);
        }
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    fn relayer_address(&self) -> Address {
        self.relayer
    }

    fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.clone()
    }

    async fn read_code(&self, address: Address, chain_id: ChainId) -> Result<Bytes, RelayError> {
        self.check(chain_id)?;
        let state = self.state.lock().unwrap();
        Ok(state.code.get(&(address, chain_id)).cloned().unwrap_or_default())
    }

    async fn balance(&self, address: Address, chain_id: ChainId) -> Result<U256, RelayError> {
        self.check(chain_id)?;
        let state = self.state.lock().unwrap();
        Ok(state.balances.get(&(address, chain_id)).copied().unwrap_or_default())
    }

    async fn gas_price(&self, chain_id: ChainId) -> Result<u128, RelayError> {
        self.check(chain_id)?;
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn call(&self, tx: TransactionRequest, chain_id: ChainId) -> Result<Bytes, RelayError> {
        self.check(chain_id)?;
        let to = tx.to.and_then(|kind| kind.to().copied()).unwrap_or_default();
        let input = tx.input.input().cloned().unwrap_or_default();

        if to == self.factory {
            let call = IWalletFactory::walletAddressCall::abi_decode(&input)
                .map_err(|e| RelayError::Rpc(e.to_string()))?;
            return Ok(Self::wallet_for(call.owner, call.nonce).abi_encode().into());
        }
        if IWallet::nonceCall::abi_decode(&input).is_ok() {
            let state = self.state.lock().unwrap();
            if !state.code.contains_key(&(to, chain_id)) {
                return Ok(Bytes::new());
            }
            let nonce = state.nonces.get(&(to, chain_id)).copied().unwrap_or_default();
            return Ok(nonce.abi_encode().into());
        }
        Err(RelayError::Rpc(format!("unexpected call to {to}")))
    }

    async fn estimate_execution_cost(
        &self,
        _wallet: Address,
        _calldata: Bytes,
        chain_id: ChainId,
    ) -> Result<ExecutionEstimate, RelayError> {
        self.check(chain_id)?;
        // let concurrent submissions interleave
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        if let Some(reason) = &state.revert {
            return Err(RelayError::ExecutionWouldRevert(reason.clone()));
        }
        Ok(ExecutionEstimate {
            gas_limit: state.gas_limit,
            gas_price: state.gas_price,
        })
    }

    async fn broadcast(
        &self,
        tx: TransactionRequest,
        chain_id: ChainId,
    ) -> Result<B256, RelayError> {
        self.check(chain_id)?;
        let mut state = self.state.lock().unwrap();
        state.sent += 1;
        let tx_hash = keccak256(state.sent.to_be_bytes());
        self.apply(&mut state, &tx, chain_id);
        state.broadcasts.push((chain_id, tx));
        if state.confirmation_timeout {
            return Err(RelayError::ConfirmationTimeout { tx_hash });
        }
        Ok(tx_hash)
    }
}
