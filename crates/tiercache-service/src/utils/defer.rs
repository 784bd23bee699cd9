/// Guard that runs a closure when dropped.
pub struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure, returning a `DeferGuard` that will
/// run it when dropped.
pub fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn test_runs_on_drop() {
        let ran = Arc::new(AtomicBool::new(false));
        let guard = {
            let ran = Arc::clone(&ran);
            defer(move || ran.store(true, Ordering::SeqCst))
        };
        assert!(!ran.load(Ordering::SeqCst));
        drop(guard);
        assert!(ran.load(Ordering::SeqCst));
    }
}
