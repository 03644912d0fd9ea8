//! Solidity bindings for the smart wallet and its factory.

use alloy::sol;
use serde::{Deserialize, Serialize};

sol! {
    /// A single call executed by the smart wallet.
    ///
    /// Also the EIP-712 member type of [`ECDSAExec`], so field names and order are part of
    /// the signed document.
    #[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    struct UserOp {
        address to;
        uint256 amount;
        bytes data;
    }

    /// EIP-712 primary type signed by the wallet owner.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct ECDSAExec {
        UserOp[] userOps;
        uint256 nonce;
        uint256 chainID;
        uint256 sigChainID;
    }

    /// ECDSA-owned smart wallet.
    interface IWallet {
        function exec(UserOp[] calldata userOps, bytes calldata signature) external;
        function nonce() external view returns (uint256);
    }

    /// CREATE2 factory deploying wallets at deterministic addresses.
    interface IWalletFactory {
        function walletAddress(address owner, uint256 nonce) external view returns (address);
        function createWallet(address owner) external returns (address);
    }
}
