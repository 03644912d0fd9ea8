//! Gasless relay for owner-controlled smart contract wallets.
//!
//! Clients build and sign batches of [`types::UserOp`]s with [`builder::OperationBuilder`] and
//! [`signature::SignatureCodec`]. The relay server ([`handlers`]) validates the batch, pays gas
//! for its `exec` call and records it in the [`ledger`]. The first op of each batch reimburses
//! the relayer.

pub mod builder;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod relay;
pub mod sig_down;
pub mod signature;
pub mod telemetry;
pub mod types;
pub mod wallet;
