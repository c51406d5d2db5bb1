//! Progress sink that records every update.

use std::sync::Mutex;

use sync_core::ProgressSink;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<usize>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels `token` as soon as the `count`-th update has been published.
    pub fn cancel_after(count: usize, token: CancellationToken) -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            cancel_after: Some((count, token)),
        }
    }

    pub fn updates(&self) -> Vec<usize> {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<usize> {
        self.updates().last().copied()
    }
}

impl ProgressSink for RecordingProgress {
    fn publish(&self, current: usize) {
        let mut updates = self.updates.lock().unwrap_or_else(|e| e.into_inner());
        updates.push(current);
        if let Some((count, token)) = &self.cancel_after {
            if updates.len() == *count {
                token.cancel();
            }
        }
    }
}
