//! Producer throttling when the submission queue runs ahead of the device
//!
//! The device callback notifies the gate every time it pulls a descriptor.
//! Producers first wait a short bounded interval for room; only a badly
//! backed-up queue escalates to an open-ended wait, and that wait always
//! observes a [`CancelToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Bounded first-stage wait for queue space
pub const FREE_SPACE_WAIT: Duration = Duration::from_millis(5);

/// Descriptors above the limit tolerated before the wait escalates
pub const ESCALATION_SLACK: usize = 3;

/// Interval at which an escalated wait re-checks its cancellation token
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Cooperative cancellation flag shared between a producer and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Condition gate producers park on while the queue is full
///
/// The mutex guards only the wait/notify handshake, never queue contents.
#[derive(Debug, Default)]
pub struct Backpressure {
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Backpressure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `has_space` holds, escalating when `backlogged` holds
    ///
    /// The first stage waits at most [`FREE_SPACE_WAIT`]. If `backlogged`
    /// is still true afterwards, waits until `has_space`, until `released`
    /// (stream closed or system shutting down), or until `token` is
    /// cancelled, whichever comes first.
    pub fn wait_free_space(
        &self,
        has_space: impl Fn() -> bool,
        backlogged: impl Fn() -> bool,
        released: impl Fn() -> bool,
        token: &CancelToken,
    ) {
        let parked = || !has_space() && !released() && !token.is_cancelled();

        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let (mut guard, _) = self
            .cvar
            .wait_timeout_while(guard, FREE_SPACE_WAIT, |_| parked())
            .unwrap_or_else(|e| e.into_inner());

        if !backlogged() {
            return;
        }

        tracing::trace!("Submission backlog exceeded; escalating wait");
        while parked() {
            (guard, _) = self
                .cvar
                .wait_timeout_while(guard, CANCEL_POLL_INTERVAL, |_| parked())
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Wake one producer after the callback freed queue space
    ///
    /// Taking and dropping the lock first orders this notify after any
    /// waiter's predicate check, so the wakeup cannot be lost.
    pub fn notify_release(&self) {
        drop(self.lock.lock().unwrap_or_else(|e| e.into_inner()));
        self.cvar.notify_one();
    }

    /// Wake every parked producer (stream close / shutdown)
    pub fn wake_all(&self) {
        drop(self.lock.lock().unwrap_or_else(|e| e.into_inner()));
        self.cvar.notify_all();
    }
}
