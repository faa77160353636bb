//! Cooperative cancellation for runs
//!
//! The trigger layer holds one clone of the token and the run holds another.
//! The run calls [`CancellationToken::checkpoint`] between stages, and graph
//! workers call it between queries. Once the first persistence write has
//! started the token is no longer consulted, so a run is never abandoned
//! halfway through its writes.

use crate::error::{MatchmakerError, MatchmakerResult, RunStage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared stop flag for one run; clones observe the same flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    requested: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at its next checkpoint. Idempotent.
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Fail with `Cancelled(stage)` if a stop was requested
    pub fn checkpoint(&self, stage: RunStage) -> MatchmakerResult<()> {
        if self.is_cancelled() {
            info!(%stage, "run cancelled");
            return Err(MatchmakerError::Cancelled(stage));
        }
        Ok(())
    }
}
