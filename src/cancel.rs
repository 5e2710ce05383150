use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Jp2SubsError, Result};

/// Cooperative cancellation shared by the driver and the translation engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Jp2SubsError::Cancelled)
        } else {
            Ok(())
        }
    }
}
