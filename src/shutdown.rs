use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Process-wide shutdown signal.
///
/// Created once at startup and cloned into the acceptor and every worker.
/// Waiting on it doubles as an interruptible sleep: [`wait_timeout`]
/// returns as soon as [`trigger`] is called from any thread (typically
/// the Ctrl-C handler).
///
/// [`wait_timeout`]: ShutdownSignal::wait_timeout
/// [`trigger`]: ShutdownSignal::trigger
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown and wakes every waiter.
    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *self.flag(lock) = true;
        cvar.notify_all();
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.flag(&self.inner.0)
    }

    /// Blocks for up to `timeout`; returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = self.flag(lock);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn flag<'a>(&self, lock: &'a Mutex<bool>) -> MutexGuard<'a, bool> {
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out_when_not_triggered() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn test_trigger_wakes_waiter_early() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let triggered = waiter.wait_timeout(Duration::from_secs(10));
            (triggered, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        signal.trigger();

        let (triggered, elapsed) = handle.join().unwrap();
        assert!(triggered);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_triggered_signal_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        assert!(signal.is_triggered());
        assert!(signal.wait_timeout(Duration::from_secs(10)));
    }
}
