use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{PluginError, PluginResult};

#[derive(Debug, Default)]
struct Flag {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// One-shot cooperative cancellation token shared by every plugin invocation
/// of a single user request. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellable {
    flag: Arc<Flag>,
}

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self
            .flag
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*cancelled {
            *cancelled = true;
            self.flag.signal.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .flag
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> PluginResult<()> {
        if self.is_cancelled() {
            return Err(PluginError::Cancelled);
        }
        Ok(())
    }

    /// Blocks until cancelled or `timeout` elapses. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self
            .flag
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .flag
                .signal
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
        }

        *cancelled
    }

    /// Sleeps for `duration` unless cancelled first.
    pub fn sleep(&self, duration: Duration) -> PluginResult<()> {
        if self.wait_timeout(duration) {
            return Err(PluginError::Cancelled);
        }
        Ok(())
    }

    pub fn same_token(&self, other: &Cancellable) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watch {
    Armed,
    Fired,
    Stopped,
}

/// Cancels a request token if the request outlives `timeout`. Firing and
/// [`Watchdog::finish`] take the same lock, so a finished watchdog never
/// cancels the token afterwards. Dropping the watchdog finishes it.
#[derive(Debug)]
pub struct Watchdog {
    done: Cancellable,
    state: Arc<Mutex<Watch>>,
}

impl Watchdog {
    pub fn start(target: &Cancellable, timeout: Duration) -> Self {
        let done = Cancellable::new();
        let state = Arc::new(Mutex::new(Watch::Armed));

        let done_rx = done.clone();
        let target = target.clone();
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            if done_rx.wait_timeout(timeout) {
                return;
            }
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == Watch::Armed && !target.is_cancelled() {
                *state = Watch::Fired;
                target.cancel();
            }
        });

        Self { done, state }
    }

    fn lock_state(&self) -> MutexGuard<'_, Watch> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fired(&self) -> bool {
        *self.lock_state() == Watch::Fired
    }

    /// Disarm the watchdog. Returns `true` if it fired first.
    pub fn finish(&self) -> bool {
        let fired = {
            let mut state = self.lock_state();
            if *state == Watch::Armed {
                *state = Watch::Stopped;
            }
            *state == Watch::Fired
        };
        self.done.cancel();
        fired
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_to_clones_and_sticks() {
        let token = Cancellable::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        token.cancel();

        assert!(clone.is_cancelled());
        assert_eq!(clone.check(), Err(PluginError::Cancelled));
        assert!(token.same_token(&clone));
    }

    #[test]
    fn wait_timeout_wakes_on_cancel_from_other_thread() {
        let token = Cancellable::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().expect("cancel thread");
    }

    #[test]
    fn wait_timeout_returns_false_when_not_cancelled() {
        let token = Cancellable::new();
        assert!(!token.wait_timeout(Duration::from_millis(5)));
        assert!(token.sleep(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn watchdog_cancels_after_timeout() {
        let token = Cancellable::new();
        let watchdog = Watchdog::start(&token, Duration::from_millis(10));
        assert!(token.wait_timeout(Duration::from_secs(5)));
        assert!(watchdog.fired());
    }

    #[test]
    fn finished_watchdog_never_cancels_later() {
        let token = Cancellable::new();
        let watchdog = Watchdog::start(&token, Duration::from_millis(10));
        assert!(!watchdog.finish());
        thread::sleep(Duration::from_millis(50));
        assert!(!token.is_cancelled());
        assert!(!watchdog.fired());
    }

    #[test]
    fn finish_after_firing_reports_it() {
        let token = Cancellable::new();
        let watchdog = Watchdog::start(&token, Duration::from_millis(5));
        assert!(token.wait_timeout(Duration::from_secs(5)));
        assert!(watchdog.finish());
    }

    #[test]
    fn dropped_watchdog_never_fires() {
        let token = Cancellable::new();
        drop(Watchdog::start(&token, Duration::from_millis(30)));
        assert!(!token.wait_timeout(Duration::from_millis(80)));
    }
}
