//! Caller-provided cancellation for blocking operations.
//!
//! There is no background activity to cancel; the token is checked before
//! and after every suspension point (git subprocesses, prompts, tree
//! walks). Cancellation between checks takes effect at the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::UpgradeError;

/// Cloneable cancellation flag shared between the caller and the engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Bail out with [`UpgradeError::Cancelled`] if cancellation was
    /// requested. Call at every suspension point.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(UpgradeError::Cancelled.into());
        }
        Ok(())
    }
}
