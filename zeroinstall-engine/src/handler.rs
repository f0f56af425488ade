//! The callback surface long-running operations report through and check
//! against (spec.md §5: "the engine assumes a thread pool on which
//! `handler.run_task(task)` executes long-running operations; tasks
//! report progress through the handler and observe a shared cancellation
//! token"). No single teacher module owns this pattern; it's assembled
//! from the standard `Arc<AtomicBool>` cooperative-cancellation idiom.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation flag shared between the operation that owns it and
/// every blocking step it performs. Checked "before each recipe step,
/// before each archive file is extracted, and before each store commit"
/// (spec.md §5).
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once [`CancellationToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Canceled)` if the token has fired, otherwise `Ok(())`.
    /// Call at each of the checkpoints spec.md §5 names.
    pub fn check(&self) -> crate::errors::Result<()> {
        if self.is_cancelled() {
            Err(crate::errors::EngineError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Interactive/progress surface the engine reports through. An embedding
/// application (CLI, GUI) implements this; the engine never assumes a
/// terminal or display exists.
pub trait Handler: Send + Sync {
    /// Ask the user to approve an action that can't proceed silently
    /// (accepting an untrusted key, confirming a native package install).
    /// Returns `true` if approved.
    fn confirm(&self, question: &str) -> bool;

    /// Report progress on a named long-running step, `done` out of
    /// `total` (in abstract units, e.g. bytes or steps). `total == 0`
    /// means indeterminate.
    fn progress(&self, task: &str, done: u64, total: u64);
}

/// A [`Handler`] that approves nothing and discards progress, for
/// non-interactive or test contexts.
#[derive(Default)]
pub struct SilentHandler;

impl Handler for SilentHandler {
    fn confirm(&self, _question: &str) -> bool {
        false
    }

    fn progress(&self, _task: &str, _done: u64, _total: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_observed_through_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }
}
