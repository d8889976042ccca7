//! Cooperative cancellation for off-thread passes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag checked at every filesystem boundary. The reader cancels a
/// request by raising the flag; the worker notices at its next I/O point and
/// abandons the pass. The stale result is discarded by generation check
/// regardless, so cancellation is purely a latency optimisation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let seen = token.clone();
        assert!(!seen.is_cancelled());
        token.cancel();
        assert!(seen.is_cancelled());
    }
}
