//! Graceful shutdown on SIGINT and SIGTERM.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Cancels its token when the process receives SIGINT or SIGTERM.
#[derive(Debug)]
pub struct SigDown {
    token: CancellationToken,
}

impl SigDown {
    /// Installs the signal handlers. Fails if the runtime cannot register them.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => tracing::info!("Received SIGINT, shutting down"),
                _ = terminate.recv() => tracing::info!("Received SIGTERM, shutting down"),
            }
            cancel.cancel();
        });

        Ok(Self { token })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}
