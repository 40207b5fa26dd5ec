use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide, monotonic shutdown flag.
///
/// Every worker observes the same flag through bounded condvar/poll waits so
/// that shutdown latency is bounded by the wait timeout rather than by a
/// blocking syscall with no deadline. Once set it is never cleared.
#[derive(Clone, Debug, Default)]
pub struct Terminate(Arc<AtomicBool>);

impl Terminate {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    #[inline]
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset_and_is_monotonic() {
        let t = Terminate::new();
        assert!(!t.is_set());
        t.set();
        assert!(t.is_set());
        t.set();
        assert!(t.is_set());
    }

    #[test]
    fn clones_share_state() {
        let t = Terminate::new();
        let t2 = t.clone();
        t2.set();
        assert!(t.is_set());
    }
}
