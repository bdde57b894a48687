use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Tracks the one detector request that may be outstanding at a time.
///
/// The pipeline worker calls [`begin`](Self::begin) after the detector accepts
/// a request and waits in [`wait_idle`](Self::wait_idle) before dispatching the
/// next. The detector callback calls [`resolve`](Self::resolve).
#[derive(Default)]
pub struct InFlight {
    pending: Mutex<Option<u64>>,
    idle: Condvar,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<u64>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self, timestamp_ms: u64) {
        *self.lock() = Some(timestamp_ms);
    }

    /// Marks the request as resolved.
    ///
    /// `None` resolves whatever is outstanding (errors without a timestamp);
    /// only one request can be outstanding, so it is the one that failed. A
    /// timestamp that doesn't match the outstanding request is ignored.
    /// Returns whether the gate opened.
    pub fn resolve(&self, timestamp_ms: Option<u64>) -> bool {
        let mut pending = self.lock();
        let matches = match (*pending, timestamp_ms) {
            (Some(_), None) => true,
            (Some(current), Some(ts)) => current == ts,
            (None, _) => false,
        };
        if matches {
            *pending = None;
            self.idle.notify_all();
        }
        matches
    }

    /// Blocks until nothing is outstanding or `timeout` passes. Returns `true`
    /// when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.lock();
        while pending.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self
                .idle
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn outstanding(&self) -> Option<u64> {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn idle_gate_does_not_wait() {
        let gate = InFlight::new();
        assert!(gate.wait_idle(Duration::ZERO));
    }

    #[test]
    fn resolves_only_matching_timestamp() {
        let gate = InFlight::new();
        gate.begin(10);
        assert!(!gate.resolve(Some(9)));
        assert_eq!(gate.outstanding(), Some(10));
        assert!(gate.resolve(Some(10)));
        assert_eq!(gate.outstanding(), None);
    }

    #[test]
    fn untimed_error_resolves_outstanding() {
        let gate = InFlight::new();
        gate.begin(3);
        assert!(gate.resolve(None));
        assert!(!gate.resolve(None));
    }

    #[test]
    fn gate_stays_closed_until_resolved() {
        let gate = InFlight::new();
        gate.begin(1);
        assert!(!gate.wait_idle(Duration::from_millis(10)));
        assert!(!gate.wait_idle(Duration::from_millis(10)));
        assert_eq!(gate.outstanding(), Some(1));
        assert!(gate.resolve(Some(1)));
        assert!(gate.wait_idle(Duration::ZERO));
    }

    #[test]
    fn wait_idle_wakes_on_resolve() {
        let gate = Arc::new(InFlight::new());
        gate.begin(5);
        let resolver = gate.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            resolver.resolve(Some(5));
        });
        assert!(gate.wait_idle(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
