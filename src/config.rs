//! Configuration file parsing for the wallet relay.
//!
//! Settings are read from a TOML file (`CONFIG_FILE`, default `config.toml`) and may be
//! overridden with `RELAY__`-prefixed environment variables, e.g.
//! `RELAY__TRANSACTION__CONFIRMATION_TIMEOUT_SECONDS=60`.
//!
//! The relayer private key is never read from the file; it comes from
//! `RELAYER_PRIVATE_KEY` (see [`RelayConfig::relayer_key_from_env`]).

use alloy::primitives::{Address, ChainId, address};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::ledger::DuplicatePolicy;

/// Environment variable holding the hex-encoded relayer private key.
pub const ENV_RELAYER_PRIVATE_KEY: &str = "RELAYER_PRIVATE_KEY";
/// Environment variable pointing at the TOML configuration file.
pub const ENV_CONFIG_FILE: &str = "CONFIG_FILE";

/// Complete relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Chain used to derive the wallet address when a request names no chain.
    /// Unset means the first entry of `chains`.
    pub default_chain_id: Option<ChainId>,
    pub chains: Vec<ChainConfig>,
    pub wallet: WalletConfig,
    pub fees: FeeConfig,
    pub transaction: TransactionConfig,
    pub ledger: LedgerConfig,
    pub cors: CorsConfig,
    pub request: RequestConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_chain_id: None,
            chains: vec![],
            wallet: WalletConfig::default(),
            fees: FeeConfig::default(),
            transaction: TransactionConfig::default(),
            ledger: LedgerConfig::default(),
            cors: CorsConfig::default(),
            request: RequestConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file, with `RELAY__` environment overrides.
    ///
    /// If the file doesn't exist, defaults (plus environment overrides) are used.
    /// If the file exists but is malformed, returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();
        let mut builder = config::Config::builder();

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
        }

        builder
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Rejects a `default_chain_id` that is not among the configured chains.
    pub fn validated(self) -> Result<Self, config::ConfigError> {
        match self.default_chain_id {
            Some(chain_id) if self.chain(chain_id).is_none() => Err(config::ConfigError::Message(
                format!("default_chain_id {chain_id} is not one of the configured chains"),
            )),
            _ => Ok(self),
        }
    }

    /// Chain used for address derivation: the explicit default, else the first configured chain.
    pub fn default_chain(&self) -> Option<ChainId> {
        self.default_chain_id
            .or_else(|| self.chains.first().map(|c| c.chain_id))
    }

    /// Load configuration from the file named by `CONFIG_FILE` or `config.toml`.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var(ENV_CONFIG_FILE).unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(config_path)
    }

    /// Reads the relayer private key from the environment.
    pub fn relayer_key_from_env() -> Option<String> {
        std::env::var(ENV_RELAYER_PRIVATE_KEY).ok().filter(|k| !k.trim().is_empty())
    }

    /// Looks up the endpoint list of a configured chain.
    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

/// A chain and its ordered RPC endpoints. The first healthy endpoint wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub rpcs: Vec<Url>,
}

/// Smart wallet contracts and the EIP-712 domain they verify against.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Wallet factory, same address on every chain.
    pub factory: Address,
    /// EIP-712 domain name of the wallet contract.
    pub domain_name: String,
    /// EIP-712 domain version of the wallet contract.
    pub domain_version: String,
    /// Reference chain ID pinned in the EIP-712 domain. Deliberately independent of the
    /// chain a batch executes on; see [`crate::signature`].
    pub domain_chain_id: ChainId,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            factory: address!("0x0000000000000000000000000000000000000000"),
            domain_name: "ECDSAWallet".to_string(),
            domain_version: "0.0.1".to_string(),
            domain_chain_id: 5,
        }
    }
}

/// Client-side fee quoting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Conservative gas limit the client multiplies with the gas price to quote the fee.
    pub client_gas_limit: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            client_gas_limit: 300_000,
        }
    }
}

/// RPC and submission timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Timeout for a single endpoint probe during chain resolution.
    pub probe_timeout_seconds: u64,
    /// Minimum wait before an unresolved chain is probed again.
    pub resolve_retry_seconds: u64,
    /// Timeout for individual RPC requests.
    pub rpc_timeout_seconds: u64,
    /// Deadline for a broadcast transaction to reach the required confirmations.
    pub confirmation_timeout_seconds: u64,
    /// Confirmations to wait for after broadcast.
    pub confirmations: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: 5,
            resolve_retry_seconds: 30,
            rpc_timeout_seconds: 30,
            confirmation_timeout_seconds: 120,
            confirmations: 1,
        }
    }
}

impl TransactionConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn resolve_retry(&self) -> Duration {
        Duration::from_secs(self.resolve_retry_seconds)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_seconds)
    }
}

/// Which engine backs the transaction ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    Postgres,
}

/// Transaction ledger settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Connection string, required for the postgres backend. `DATABASE_URL` is used when unset.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            database_url: None,
            max_connections: 10,
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

impl LedgerConfig {
    pub fn database_url(&self) -> Option<String> {
        self.database_url.clone().or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// List of allowed origins. Empty list means allow all (*).
    pub allowed_origins: Vec<String>,
}

/// Request validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Maximum request body size in bytes (default 1MB).
    pub max_body_size_bytes: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_body_size_bytes: 1_048_576,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.fees.client_gas_limit, 300_000);
        assert_eq!(config.wallet.domain_name, "ECDSAWallet");
        assert_eq!(config.wallet.domain_version, "0.0.1");
        assert_eq!(config.wallet.domain_chain_id, 5);
        assert_eq!(config.transaction.confirmations, 1);
        assert_eq!(config.ledger.backend, LedgerBackend::Memory);
        assert_eq!(config.ledger.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.request.max_body_size_bytes, 1_048_576);
        assert!(config.chains.is_empty());
    }

    #[test]
    fn test_parse_chains_in_order() {
        let config_str = r#"
default_chain_id = 137

[[chains]]
chain_id = 137
rpcs = ["https://polygon-a.example", "https://polygon-b.example"]

[[chains]]
chain_id = 43113
rpcs = ["https://fuji.example"]
"#;

        let config: RelayConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.default_chain_id, Some(137));
        assert_eq!(config.default_chain(), Some(137));
        assert_eq!(config.chains.len(), 2);

        let polygon = config.chain(137).unwrap();
        assert_eq!(polygon.rpcs[0].as_str(), "https://polygon-a.example/");
        assert_eq!(polygon.rpcs[1].as_str(), "https://polygon-b.example/");
        assert!(config.chain(1).is_none());
    }

    #[test]
    fn test_default_chain_falls_back_to_first_chain() {
        let config_str = r#"
[[chains]]
chain_id = 43113
rpcs = ["https://fuji.example"]

[[chains]]
chain_id = 137
rpcs = ["https://polygon.example"]
"#;

        let config: RelayConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.default_chain_id, None);
        assert_eq!(config.default_chain(), Some(43113));
        assert!(RelayConfig::default().default_chain().is_none());
    }

    #[test]
    fn test_default_chain_outside_chains_is_rejected() {
        let config_str = r#"
default_chain_id = 1

[[chains]]
chain_id = 137
rpcs = ["https://polygon.example"]
"#;

        let config: RelayConfig = toml::from_str(config_str).unwrap();
        let err = config.validated().unwrap_err();
        assert!(err.to_string().contains("default_chain_id 1"));
    }

    #[test]
    fn test_wallet_section_partial_override() {
        let config_str = r#"
[wallet]
factory = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
domain_chain_id = 1
"#;

        let config: RelayConfig = toml::from_str(config_str).unwrap();
        assert_eq!(
            config.wallet.factory,
            address!("0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );
        assert_eq!(config.wallet.domain_chain_id, 1);
        // untouched fields keep defaults
        assert_eq!(config.wallet.domain_name, "ECDSAWallet");
    }

    #[test]
    fn test_ledger_postgres_with_ignore_policy() {
        let config_str = r#"
[ledger]
backend = "postgres"
database_url = "postgres://relay@localhost/relay"
duplicate_policy = "ignore"
"#;

        let config: RelayConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.ledger.backend, LedgerBackend::Postgres);
        assert_eq!(config.ledger.duplicate_policy, DuplicatePolicy::Ignore);
        assert_eq!(
            config.ledger.database_url().as_deref(),
            Some("postgres://relay@localhost/relay")
        );
    }

    #[test]
    fn test_transaction_durations() {
        let config_str = r#"
[transaction]
probe_timeout_seconds = 2
confirmation_timeout_seconds = 45
"#;

        let config: RelayConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.transaction.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.transaction.confirmation_timeout(), Duration::from_secs(45));
        assert_eq!(config.transaction.rpc_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RelayConfig::from_file("/nonexistent/relay-config.toml").unwrap();
        assert_eq!(config.fees.client_gas_limit, 300_000);
    }
}
