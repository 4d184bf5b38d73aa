//! Status banners and progress fan-out

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Two-line status output on the device
pub trait StatusDisplay: Send + Sync {
    /// Show a title and a message
    fn show(&self, title: &str, message: &str);
}

/// Display that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl StatusDisplay for NullDisplay {
    fn show(&self, _title: &str, _message: &str) {}
}

/// Progress of one segment transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Source path of the segment
    pub path: String,

    /// Bytes written so far
    pub bytes_transferred: u64,

    /// Total bytes in the segment
    pub total_bytes: u64,

    /// Progress percentage (0-100)
    pub percent: u8,
}

/// Percent complete, rounded to nearest and held at 99 until every byte is
/// written.
pub fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 || done >= total {
        return 100;
    }
    let rounded = (u128::from(done) * 100 + u128::from(total) / 2) / u128::from(total);
    u8::try_from(rounded.min(99)).unwrap_or(99)
}

/// Sends progress to the display and to broadcast subscribers
#[derive(Clone)]
pub struct ProgressReporter {
    display: Arc<dyn StatusDisplay>,
    progress_tx: broadcast::Sender<TransferProgress>,
}

impl ProgressReporter {
    /// Create a reporter over a display
    pub fn new(display: Arc<dyn StatusDisplay>) -> Self {
        let (progress_tx, _) = broadcast::channel(256);
        Self {
            display,
            progress_tx,
        }
    }

    /// Show a status banner
    pub fn banner(&self, title: &str, message: &str) {
        self.display.show(title, message);
    }

    /// Publish a progress update
    pub fn progress(&self, progress: TransferProgress) {
        self.display
            .show(&progress.path, &format!("Progress: {}%", progress.percent));
        // No subscribers is fine.
        let _ = self.progress_tx.send(progress);
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<TransferProgress> {
        self.progress_tx.subscribe()
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("subscribers", &self.progress_tx.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_sequence_for_partial_last_chunk() {
        let points: Vec<u8> = [4096u64, 8192, 10_000]
            .iter()
            .map(|&done| progress_percent(done, 10_000))
            .collect();
        assert_eq!(points, vec![41, 82, 100]);
    }

    #[test]
    fn test_percent_never_reports_done_early() {
        assert_eq!(progress_percent(9_999, 10_000), 99);
        assert_eq!(progress_percent(0, 10_000), 0);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[tokio::test]
    async fn test_progress_reaches_subscribers() -> Result<(), broadcast::error::RecvError> {
        let reporter = ProgressReporter::new(Arc::new(NullDisplay));
        let mut rx = reporter.subscribe();
        reporter.progress(TransferProgress {
            path: "/a.bin".into(),
            bytes_transferred: 10,
            total_bytes: 10,
            percent: 100,
        });
        let received = rx.recv().await?;
        assert_eq!(received.percent, 100);
        Ok(())
    }
}
