//! Worker error reporting

use crate::error::LinkError;
use crate::stats::LinkStats;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Counts, logs and forwards worker errors without blocking the worker
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    tx: mpsc::Sender<LinkError>,
    stats: Arc<LinkStats>,
}

impl ErrorReporter {
    pub(crate) fn channel(
        capacity: usize,
        stats: Arc<LinkStats>,
    ) -> (Self, mpsc::Receiver<LinkError>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, stats }, rx)
    }

    pub(crate) fn report(&self, worker: &'static str, error: LinkError) {
        self.stats.record_error(&error);
        warn!(worker, error = %error, "Link worker error");

        // Full: the application is not draining. Closed: nobody listens.
        if let Err(TrySendError::Full(_)) = self.tx.try_send(error) {
            debug!(worker, "Error channel full, report dropped");
        }
    }
}
