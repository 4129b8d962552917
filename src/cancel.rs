//! Cooperative cancellation token.
//!
//! No async runtime backs this crate's I/O (see §5): long-running loops —
//! `FileCache::acquire`'s blocking wait, `Writer::run`'s tick loop — poll a
//! `Cancel` between block-granular operations instead of selecting on a
//! future.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Cancel(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled_and_latches() {
        let c = Cancel::new();
        assert!(!c.is_cancelled());
        c.cancel();
        assert!(c.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let c = Cancel::new();
        let c2 = c.clone();
        c2.cancel();
        assert!(c.is_cancelled());
    }
}
