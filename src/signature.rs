//! EIP-712 signing of operation batches and the chain-scoped signature envelope.
//!
//! The typed-data domain pins a fixed reference chain ID ([`WalletConfig::domain_chain_id`])
//! while the signed message carries two further chain IDs: `chainID`, where the batch executes,
//! and `sigChainID`, the chain the signature is scoped to. The three are never derived from each
//! other. The wallet contract checks `sigChainID` against the envelope, which is what stops a
//! signature from being replayed on another chain.
//!
//! Envelope wire format: ABI parameters `(uint256 sigChainID, bytes signature)`.

use alloy::primitives::{Address, B256, Bytes, ChainId, Signature, U256};
use alloy::signers::Signer;
use alloy::sol_types::{Eip712Domain, SolStruct, SolValue};

use crate::config::WalletConfig;
use crate::contracts::ECDSAExec;
use crate::error::RelayError;
use crate::types::OperationBatch;

#[derive(Debug, Clone)]
pub struct SignatureCodec {
    domain_name: String,
    domain_version: String,
    domain_chain_id: ChainId,
}

impl SignatureCodec {
    pub fn new(config: &WalletConfig) -> Self {
        Self {
            domain_name: config.domain_name.clone(),
            domain_version: config.domain_version.clone(),
            domain_chain_id: config.domain_chain_id,
        }
    }

    fn domain(&self, wallet: Address) -> Eip712Domain {
        Eip712Domain::new(
            Some(self.domain_name.clone().into()),
            Some(self.domain_version.clone().into()),
            Some(U256::from(self.domain_chain_id)),
            Some(wallet),
            None,
        )
    }

    /// EIP-712 hash of `batch` scoped to `scope_chain_id`.
    pub fn signing_hash(&self, batch: &OperationBatch, scope_chain_id: ChainId) -> B256 {
        let message = ECDSAExec {
            userOps: batch.ops.clone(),
            nonce: batch.nonce,
            chainID: U256::from(batch.chain_id),
            sigChainID: U256::from(scope_chain_id),
        };
        message.eip712_signing_hash(&self.domain(batch.wallet))
    }

    /// Signs `batch` with `signer` and attaches the encoded envelope.
    pub async fn sign<S>(
        &self,
        mut batch: OperationBatch,
        scope_chain_id: ChainId,
        signer: &S,
    ) -> Result<OperationBatch, RelayError>
    where
        S: Signer + Send + Sync + ?Sized,
    {
        let hash = self.signing_hash(&batch, scope_chain_id);
        let signature = signer.sign_hash(&hash).await?;
        tracing::debug!(
            wallet = %batch.wallet,
            chain_id = batch.chain_id,
            scope_chain_id,
            "Batch signed"
        );
        batch.envelope = encode_envelope(scope_chain_id, &signature.as_bytes());
        batch.scope_chain_id = Some(scope_chain_id);
        Ok(batch)
    }

    /// Address that produced `signature` over `batch` scoped to `scope_chain_id`.
    pub fn recover(
        &self,
        batch: &OperationBatch,
        scope_chain_id: ChainId,
        signature: &[u8],
    ) -> Result<Address, RelayError> {
        let signature = Signature::try_from(signature)
            .map_err(|e| RelayError::MalformedEnvelope(format!("bad signature: {e}")))?;
        let hash = self.signing_hash(batch, scope_chain_id);
        signature
            .recover_address_from_prehash(&hash)
            .map_err(|e| RelayError::Signing(e.to_string()))
    }
}

pub fn encode_envelope(scope_chain_id: ChainId, signature: &[u8]) -> Bytes {
    (U256::from(scope_chain_id), Bytes::copy_from_slice(signature))
        .abi_encode_params()
        .into()
}

/// Inverse of [`encode_envelope`]. A scope that does not fit a chain ID is malformed.
pub fn decode_envelope(envelope: &[u8]) -> Result<(ChainId, Bytes), RelayError> {
    let (scope, signature) = <(U256, Bytes)>::abi_decode_params(envelope)
        .map_err(|e| RelayError::MalformedEnvelope(e.to_string()))?;
    let scope = ChainId::try_from(scope)
        .map_err(|_| RelayError::MalformedEnvelope(format!("scope chain ID {scope} out of range")))?;
    Ok((scope, signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserOp;
    use alloy::primitives::address;
    use alloy::signers::local::PrivateKeySigner;

    fn signer() -> PrivateKeySigner {
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
            .parse()
            .unwrap()
    }

    fn batch() -> OperationBatch {
        OperationBatch {
            ops: vec![
                UserOp {
                    to: address!("0x2222222222222222222222222222222222222222"),
                    amount: U256::from(6_000_000u64),
                    data: Bytes::new(),
                },
                UserOp {
                    to: address!("0x4444444444444444444444444444444444444444"),
                    amount: U256::from(999_999_999_994_000_000u64),
                    data: Bytes::new(),
                },
            ],
            wallet: address!("0x5555555555555555555555555555555555555555"),
            nonce: U256::from(3),
            chain_id: 137,
            scope_chain_id: None,
            envelope: Bytes::new(),
        }
    }

    #[test]
    fn envelope_round_trip() {
        let sig = vec![0xabu8; 65];
        let envelope = encode_envelope(43113, &sig);
        let (scope, decoded) = decode_envelope(&envelope).unwrap();
        assert_eq!(scope, 43113);
        assert_eq!(decoded.as_ref(), sig.as_slice());
    }

    #[test]
    fn envelope_layout_is_abi_params() {
        let envelope = encode_envelope(1, &[0x01, 0x02]);
        // head: scope word + offset word, tail: length word + padded data
        assert_eq!(envelope.len(), 4 * 32);
        assert_eq!(envelope[31], 1);
        assert_eq!(envelope[63], 0x40);
        assert_eq!(envelope[95], 2);
        assert_eq!(&envelope[96..98], &[0x01, 0x02]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_envelope(&[0x12, 0x34]),
            Err(RelayError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode_envelope(&[]),
            Err(RelayError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn decode_rejects_oversized_scope() {
        let envelope: Bytes = (U256::from(u64::MAX) + U256::from(1), Bytes::from_static(&[1]))
            .abi_encode_params()
            .into();
        assert!(matches!(
            decode_envelope(&envelope),
            Err(RelayError::MalformedEnvelope(_))
        ));
    }

    #[tokio::test]
    async fn sign_then_recover() {
        let codec = SignatureCodec::new(&WalletConfig::default());
        let signer = signer();

        let signed = codec.sign(batch(), 43113, &signer).await.unwrap();
        assert!(signed.is_signed());
        assert_eq!(signed.scope_chain_id, Some(43113));

        let (scope, signature) = decode_envelope(&signed.envelope).unwrap();
        assert_eq!(scope, 43113);
        assert_eq!(signature.len(), 65);
        assert_eq!(
            codec.recover(&signed, scope, &signature).unwrap(),
            signer.address()
        );
    }

    #[tokio::test]
    async fn signature_does_not_verify_under_other_scope() {
        let codec = SignatureCodec::new(&WalletConfig::default());
        let signer = signer();

        let signed = codec.sign(batch(), 43113, &signer).await.unwrap();
        let (_, signature) = decode_envelope(&signed.envelope).unwrap();

        let recovered = codec.recover(&signed, 137, &signature).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn scope_and_domain_chain_are_independent() {
        let batch = batch();
        let codec = SignatureCodec::new(&WalletConfig::default());
        let other_domain = SignatureCodec::new(&WalletConfig {
            domain_chain_id: 137,
            ..WalletConfig::default()
        });

        // scope follows neither the domain chain nor the execution chain
        let scoped_137 = codec.signing_hash(&batch, 137);
        let scoped_5 = codec.signing_hash(&batch, 5);
        assert_ne!(scoped_137, scoped_5);

        // domain chain changes the hash even when the scope is the same
        assert_ne!(codec.signing_hash(&batch, 137), other_domain.signing_hash(&batch, 137));
    }

    #[test]
    fn hash_covers_every_field() {
        let codec = SignatureCodec::new(&WalletConfig::default());
        let base = codec.signing_hash(&batch(), 137);

        let mut reordered = batch();
        reordered.ops.swap(0, 1);
        assert_ne!(codec.signing_hash(&reordered, 137), base);

        let mut bumped = batch();
        bumped.nonce += U256::from(1);
        assert_ne!(codec.signing_hash(&bumped, 137), base);

        let mut moved = batch();
        moved.chain_id = 43113;
        assert_ne!(codec.signing_hash(&moved, 137), base);

        let mut other_wallet = batch();
        other_wallet.wallet = address!("0x6666666666666666666666666666666666666666");
        assert_ne!(codec.signing_hash(&other_wallet, 137), base);
    }

    #[test]
    fn recover_rejects_short_signature() {
        let codec = SignatureCodec::new(&WalletConfig::default());
        assert!(matches!(
            codec.recover(&batch(), 137, &[0u8; 10]),
            Err(RelayError::MalformedEnvelope(_))
        ));
    }
}
