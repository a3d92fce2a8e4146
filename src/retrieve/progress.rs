//! Transfer progress reporting over a bounded channel.
//!
//! The retriever emits one event per received chunk. Delivery is strictly
//! best-effort: a full buffer or a departed consumer drops the event
//! instead of stalling the transfer, so wiring a progress bar (or nothing
//! at all) never changes download behavior.

use tokio::sync::mpsc;
use tracing::trace;

/// One observation during a streaming transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// URL the bytes are coming from.
    pub url: String,
    /// Bytes received so far.
    pub bytes_received: u64,
    /// Declared total, when the server sent a Content-Length.
    pub total_bytes: Option<u64>,
}

/// Sending half handed to the retriever.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<TransferProgress>,
}

impl ProgressSender {
    /// Emits one event, dropping it if the consumer cannot keep up.
    pub fn emit(&self, progress: TransferProgress) {
        if let Err(e) = self.tx.try_send(progress) {
            trace!(error = %e, "progress event dropped");
        }
    }
}

/// Builds a bounded progress channel.
#[must_use]
pub fn progress_channel(capacity: usize) -> (ProgressSender, mpsc::Receiver<TransferProgress>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx }, rx)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(bytes: u64) -> TransferProgress {
        TransferProgress {
            url: "http://cdn.test/file.pdf".to_string(),
            bytes_received: bytes,
            total_bytes: Some(1000),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut rx) = progress_channel(8);
        tx.emit(event(100));
        tx.emit(event(200));
        assert_eq!(rx.recv().await.unwrap().bytes_received, 100);
        assert_eq!(rx.recv().await.unwrap().bytes_received, 200);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let (tx, mut rx) = progress_channel(1);
        tx.emit(event(1));
        tx.emit(event(2));
        tx.emit(event(3));
        assert_eq!(rx.try_recv().unwrap().bytes_received, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_departed_receiver_is_harmless() {
        let (tx, rx) = progress_channel(4);
        drop(rx);
        tx.emit(event(42));
    }
}
