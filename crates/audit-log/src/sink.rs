use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::recorder::AuditRecorder;
use crate::writer::{AuditWriteError, AuditWriter};

const CHANNEL_BUFFER: usize = 4096;

/// Pending lines are flushed at least this often.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Cloneable handle feeding a background JSON-lines writer.
///
/// [`record`](AuditRecorder::record) never waits: when the channel is full
/// the entry is dropped, counted and logged. [`log`](Self::log) waits for
/// room instead and suits lifecycle records outside evaluation paths.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// Open the log at `path` and spawn the writer task. The task drains
    /// remaining entries, flushes and exits once every clone is dropped.
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let writer = AuditWriter::new(path).await?;
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let handle = tokio::spawn(drain(writer, rx));
        Ok((
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        ))
    }

    pub async fn log(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.send(entry).await {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(event_type = ?err.0.event_type, "audit writer gone; entry dropped");
        }
    }

    /// Entries discarded because the writer was saturated or gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditRecorder for AuditSink {
    fn record(&self, entry: AuditEntry) {
        let (entry, why) = match self.tx.try_send(entry) {
            Ok(()) => return,
            Err(TrySendError::Full(entry)) => (entry, "audit channel full; entry dropped"),
            Err(TrySendError::Closed(entry)) => (entry, "audit writer gone; entry dropped"),
        };
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(event_type = ?entry.event_type, dropped_total = total, "{why}");
    }
}

async fn drain(mut writer: AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pending = false;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(entry) => match writer.write(&entry).await {
                    Ok(()) => pending = true,
                    Err(err) => tracing::error!(%err, "audit entry not written"),
                },
                None => break,
            },
            _ = ticker.tick(), if pending => {
                match writer.flush().await {
                    Ok(()) => pending = false,
                    Err(err) => tracing::error!(%err, "audit log flush failed"),
                }
            }
        }
    }

    if let Err(err) = writer.flush().await {
        tracing::error!(%err, "final audit log flush failed");
    }
    tracing::debug!(
        path = %writer.path().display(),
        lines = writer.lines_written(),
        "audit writer stopped"
    );
}
