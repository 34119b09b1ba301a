use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot readiness latch.
///
/// The render thread opens the latch exactly once, with `true` on a
/// successful start and `false` when startup failed. Waiters observe the
/// outcome or time out; later `open` calls are ignored so a slow startup
/// racing a timed-out waiter cannot flip the result.
pub struct ReadyLatch {
    state: Mutex<Option<bool>>,
    cond: Condvar,
}

impl ReadyLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Records the startup outcome and wakes all waiters. First call wins.
    pub fn open(&self, ok: bool) {
        let mut state = self.state.lock();
        if state.is_none() {
            *state = Some(ok);
            self.cond.notify_all();
        }
    }

    /// Blocks until the latch opens or `timeout` elapses. Returns `true`
    /// only for a successful open; a timeout and a failed startup both
    /// report `false`.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(ok) = *state {
                return ok;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self.cond.wait_for(&mut state, deadline - now).timed_out() {
                return state.unwrap_or(false);
            }
        }
    }

    /// The recorded outcome, if the latch has opened.
    pub fn outcome(&self) -> Option<bool> {
        *self.state.lock()
    }
}

impl Default for ReadyLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn open_before_wait_returns_outcome() {
        let latch = ReadyLatch::new();
        latch.open(true);
        assert!(latch.wait(Duration::from_millis(1)));
        assert_eq!(latch.outcome(), Some(true));
    }

    #[test]
    fn wait_times_out_when_never_opened() {
        let latch = ReadyLatch::new();
        assert!(!latch.wait(Duration::from_millis(20)));
        assert_eq!(latch.outcome(), None);
    }

    #[test]
    fn first_open_wins() {
        let latch = ReadyLatch::new();
        latch.open(false);
        latch.open(true);
        assert!(!latch.wait(Duration::from_millis(1)));
    }

    #[test]
    fn waiter_sees_open_from_other_thread() {
        let latch = Arc::new(ReadyLatch::new());
        let opener = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            opener.open(true);
        });
        assert!(latch.wait(Duration::from_secs(2)));
        handle.join().unwrap();
    }
}
