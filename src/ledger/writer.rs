//! Single-writer queue that records batches off the response path.
//!
//! Handlers hand records to [`LedgerWriter::submit`] and return immediately. One background
//! task drains the queue and inserts records in arrival order. A failed write is logged and
//! counted; it never reaches the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{DuplicatePolicy, Ledger, LedgerApi, LedgerError, LedgerRecord};

enum WriterMessage {
    Record(Box<LedgerRecord>),
    /// Answered once every record queued before it has been handled.
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of the writer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WriterStats {
    pub written: u64,
    /// Duplicates seen, whichever the policy.
    pub duplicates: u64,
    /// Failed writes, including duplicates under [`DuplicatePolicy::Reject`].
    pub failed: u64,
}

/// Handle to the background ledger writer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LedgerWriter {
    sender: mpsc::UnboundedSender<WriterMessage>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for WriterMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterMessage::Record(record) => write!(f, "Record({})", record.tx_hash),
            WriterMessage::Flush(_) => write!(f, "Flush"),
        }
    }
}

impl LedgerWriter {
    /// Spawns the writer task. It stops once every handle has been dropped and the queue is empty.
    pub fn spawn(ledger: Ledger, policy: DuplicatePolicy) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let task_counters = Arc::clone(&counters);
        let handle = tokio::spawn(async move {
            tracing::info!(?policy, "Ledger writer started");
            while let Some(message) = receiver.recv().await {
                match message {
                    WriterMessage::Record(record) => {
                        write_record(&ledger, &record, policy, &task_counters).await
                    }
                    WriterMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::info!("Ledger writer stopped");
        });

        (Self { sender, counters }, handle)
    }

    /// Queues `record` for insertion without waiting.
    pub fn submit(&self, record: LedgerRecord) {
        let tx_hash = record.tx_hash.clone();
        if self.sender.send(WriterMessage::Record(Box::new(record))).is_err() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(%tx_hash, "Ledger writer is gone, record dropped");
        }
    }

    /// Waits until every record submitted before this call has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(WriterMessage::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            written: self.counters.written.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn write_record(
    ledger: &Ledger,
    record: &LedgerRecord,
    policy: DuplicatePolicy,
    counters: &Counters,
) {
    match ledger.insert(record).await {
        Ok(()) => {
            counters.written.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(tx_hash = %record.tx_hash, wallet = %record.wallet, "Batch recorded");
        }
        Err(LedgerError::DuplicateTransaction(tx_hash)) => {
            counters.duplicates.fetch_add(1, Ordering::Relaxed);
            match policy {
                DuplicatePolicy::Ignore => {
                    tracing::debug!(%tx_hash, "Duplicate record ignored");
                }
                DuplicatePolicy::Reject => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%tx_hash, "Duplicate record rejected");
                }
            }
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(tx_hash = %record.tx_hash, error = %e, "Failed to record batch");
        }
    }
}
