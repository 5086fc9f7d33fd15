//! Progress reporting and transfer results.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transfer::job::JobKind;

/// Snapshot emitted after every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub job: JobKind,
    /// 0-based index of the chunk just handed to the transport.
    pub chunk: usize,
    pub total_chunks: usize,
    pub bytes_sent: usize,
    pub total_bytes: usize,
    pub elapsed: Duration,
}

impl TransferProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        (self.chunk + 1) as f64 / self.total_chunks as f64
    }
}

impl std::fmt::Display for TransferProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: chunk {}/{}, {:.2}s",
            self.job,
            self.chunk + 1,
            self.total_chunks,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Totals for one run (or several, after [`TransferReport::absorb`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub chunks: usize,
    pub bytes: usize,
    pub acknowledged: usize,
    /// Unacknowledged writes the transport rejected.
    pub dropped: usize,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn absorb(&mut self, other: &TransferReport) {
        self.chunks += other.chunks;
        self.bytes += other.bytes;
        self.acknowledged += other.acknowledged;
        self.dropped += other.dropped;
        self.elapsed += other.elapsed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed(TransferReport),
    /// Stopped between chunks at the caller's request. The device may
    /// hold a partial payload.
    Cancelled(TransferReport),
}

impl TransferOutcome {
    pub fn report(&self) -> &TransferReport {
        match self {
            Self::Completed(r) | Self::Cancelled(r) => r,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Progress(TransferProgress),
    /// Sent once when a job finishes every chunk. Never sent for a
    /// cancelled or failed job.
    Completed { job: JobKind, report: TransferReport },
}

// ── TransferControl ──────────────────────────────────────────────

/// Caller-side handle for one transfer: cancellation plus an optional
/// progress channel.
#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    cancel: CancellationToken,
    progress: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// A control whose events arrive on the returned receiver.
    pub fn with_progress() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                cancel: CancellationToken::new(),
                progress: Some(tx),
            },
            rx,
        )
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.progress {
            // A caller that dropped its receiver no longer wants progress.
            let _ = tx.send(event);
        }
    }
}
