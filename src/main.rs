//! Wallet relay HTTP entrypoint.
//!
//! Launches an Axum server that pays gas for signed smart wallet batches on the configured
//! EVM chains.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `RELAYER_PRIVATE_KEY` hex key of the gas-paying account (required)
//! - `CONFIG_FILE` path of the TOML configuration, default `config.toml`
//! - `HOST`, `PORT` control binding address
//! - `RUST_LOG` log filter

use alloy::signers::local::PrivateKeySigner;
use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors;

use wallet_relay::chain::evm::EvmGateway;
use wallet_relay::config::{LedgerBackend, RelayConfig};
use wallet_relay::handlers::{self, AppState};
use wallet_relay::ledger::{Ledger, LedgerApi, LedgerWriter, PgLedger};
use wallet_relay::relay::RelaySubmitter;
use wallet_relay::sig_down::SigDown;
use wallet_relay::telemetry::Telemetry;
use wallet_relay::wallet::WalletResolver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let app_config = match RelayConfig::from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            tracing::info!("Using default configuration");
            RelayConfig::default()
        }
    };

    let Some(relayer_key) = RelayConfig::relayer_key_from_env() else {
        tracing::error!("RELAYER_PRIVATE_KEY is not set");
        std::process::exit(1);
    };
    let signer: PrivateKeySigner = match relayer_key.trim().parse() {
        Ok(signer) => signer,
        Err(e) => {
            tracing::error!("RELAYER_PRIVATE_KEY is not a valid private key: {}", e);
            std::process::exit(1);
        }
    };

    let gateway = match EvmGateway::try_new(&app_config, signer).await {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            tracing::error!("Failed to create chain gateway: {}", e);
            std::process::exit(1);
        }
    };

    let ledger = match app_config.ledger.backend {
        LedgerBackend::Memory => {
            tracing::info!("Using in-memory ledger");
            Ledger::in_memory()
        }
        LedgerBackend::Postgres => {
            let Some(url) = app_config.ledger.database_url() else {
                tracing::error!("Postgres ledger selected but no database URL is configured");
                std::process::exit(1);
            };
            match PgLedger::connect(&url, app_config.ledger.max_connections).await {
                Ok(pg) => Ledger::postgres(pg),
                Err(e) => {
                    tracing::error!("Failed to connect to ledger database: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };
    if let Err(e) = ledger.create_schema_if_absent().await {
        tracing::error!(error = %e, "Failed to provision ledger schema");
    }

    let (writer, writer_handle) =
        LedgerWriter::spawn(ledger.clone(), app_config.ledger.duplicate_policy);
    let Some(default_chain_id) = app_config.default_chain() else {
        tracing::error!("No chains are configured");
        std::process::exit(1);
    };
    let resolver = WalletResolver::new(gateway.clone(), app_config.wallet.factory, default_chain_id);
    let submitter = RelaySubmitter::new(gateway.clone(), resolver.clone(), writer.clone());
    let axum_state = AppState {
        gateway,
        resolver,
        submitter,
        ledger,
        writer,
    };

    let cors_layer = if app_config.cors.allowed_origins.is_empty() {
        tracing::info!("CORS: Allowing all origins (*)");
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any)
    } else {
        tracing::info!("CORS: Restricting to {:?}", app_config.cors.allowed_origins);
        let origins: Vec<_> = app_config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors::CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any)
    };

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            app_config.request.max_body_size_bytes,
        ))
        .layer(telemetry.http_tracing())
        .layer(cors_layer);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8080);
    let host: IpAddr = match host.parse() {
        Ok(host) => host,
        Err(e) => {
            tracing::error!("HOST {:?} is not a valid IP address: {}", host, e);
            std::process::exit(1);
        }
    };

    let addr = SocketAddr::new(host, port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    // Router and state are dropped; let the writer drain what is queued.
    if let Err(e) = writer_handle.await {
        tracing::error!(error = %e, "Ledger writer task failed");
    }

    Ok(())
}
