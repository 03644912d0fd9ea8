//! Logging setup.
//!
//! Log output goes to stdout through `tracing-subscriber`'s fmt layer. The level is read from
//! `RUST_LOG` and defaults to `info`.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Builder for the process-wide subscriber.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    name: Option<&'static str>,
    version: Option<&'static str>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = Some(version);
        self
    }

    /// Installs the global subscriber. A second call leaves the first subscriber in place.
    pub fn register(self) -> Self {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy();

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .is_ok();

        if installed {
            tracing::info!(
                service = self.name.unwrap_or("unknown"),
                version = self.version.unwrap_or("unknown"),
                "Logging initialized"
            );
        }
        self
    }

    /// Per-request spans and response logs for the HTTP router.
    pub fn http_tracing(&self) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO))
    }
}
