//! Shared cancellation flag for a running batch.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct TransferControl {
    cancelled: AtomicBool,
}

impl TransferControl {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
