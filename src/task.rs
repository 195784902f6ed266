//! # Task Module
//!
//! Cancellation-aware execution of dispatch work.
//!
//! ## Overview
//!
//! A simulated round trip must never hang the test that drives it beyond the
//! caller's own deadline. [`run_cancellable`] runs the work on its own `may`
//! coroutine and waits for whichever comes first:
//!
//! - the work reports completion (or a panic) on the reply channel, or
//! - the caller's [`CancelToken`] fires (explicit cancel or deadline)
//!
//! Both racers send into the same `may::sync::mpsc` channel, so "first wins"
//! is simply the first message received. When cancellation wins, the caller
//! returns immediately; the coroutine keeps running until the work finishes
//! and its late result is dropped because the receiver is gone.
//!
//! ## Example
//!
//! ```rust
//! use fake_transport::task::{run_cancellable, CancelToken, TaskError};
//! use std::time::Duration;
//!
//! let token = CancelToken::new();
//! let value = run_cancellable("answer", &token, 0x10000, || 42).unwrap();
//! assert_eq!(value, 42);
//!
//! let token = CancelToken::with_timeout(Duration::from_millis(20));
//! let result = run_cancellable("stuck", &token, 0x10000, || {
//!     may::coroutine::sleep(Duration::from_secs(5));
//! });
//! assert!(matches!(result, Err(TaskError::Canceled(_))));
//! ```

use crate::error::CancelReason;
use may::sync::mpsc;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Stack size for the deadline timer coroutine; it only sleeps and fires.
const TIMER_STACK_SIZE: usize = 0x4000;

type Listener = Box<dyn FnOnce(CancelReason) + Send>;

#[derive(Default)]
struct CancelState {
    reason: Option<CancelReason>,
    next_listener: u64,
    listeners: Vec<(u64, Listener)>,
}

struct CancelInner {
    state: Mutex<CancelState>,
    deadline: Option<Instant>,
}

/// Cancellation signal shared between a caller and the dispatch it drives.
///
/// Cloning yields another handle to the same signal. Attach one to a request
/// with [`crate::request::RequestExt::with_cancel`]; cancelling it (or letting
/// its deadline pass) makes the in-flight dispatch return
/// [`crate::error::DispatchError::Canceled`].
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that only fires when [`CancelToken::cancel`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                state: Mutex::new(CancelState::default()),
                deadline: None,
            }),
        }
    }

    /// A token that fires with [`CancelReason::DeadlineExceeded`] once
    /// `timeout` has elapsed, unless cancelled earlier.
    ///
    /// The deadline is driven by a timer coroutine holding only a weak
    /// reference, so dropping every handle lets the token go.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let token = Self {
            inner: Arc::new(CancelInner {
                state: Mutex::new(CancelState::default()),
                deadline: Some(Instant::now() + timeout),
            }),
        };
        let weak = Arc::downgrade(&token.inner);

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The closure is Send + 'static and only touches the token through a Weak.
        let spawn_result = unsafe {
            may::coroutine::Builder::new()
                .name("cancel-deadline".to_string())
                .stack_size(TIMER_STACK_SIZE)
                .spawn(move || {
                    may::coroutine::sleep(timeout);
                    fire_weak(&weak, CancelReason::DeadlineExceeded);
                })
        };

        if let Err(e) = spawn_result {
            warn!(
                error = %e,
                timeout_ms = timeout.as_millis() as u64,
                "Failed to spawn deadline coroutine, falling back to a thread"
            );
            let weak = Arc::downgrade(&token.inner);
            let thread_result = std::thread::Builder::new()
                .name("cancel-deadline".to_string())
                .spawn(move || {
                    std::thread::sleep(timeout);
                    fire_weak(&weak, CancelReason::DeadlineExceeded);
                });
            if let Err(e) = thread_result {
                error!(error = %e, "Failed to arm deadline - token will only cancel explicitly");
            }
        }

        token
    }

    /// Fire the token with [`CancelReason::Canceled`]. Idempotent.
    pub fn cancel(&self) {
        self.fire(CancelReason::Canceled);
    }

    /// Whether the token has fired.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.reason().is_some()
    }

    /// Why the token fired, if it has.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.lock().reason
    }

    /// Deadline the token was created with, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Run `listener` once when the token fires.
    ///
    /// If the token already fired, the listener runs immediately on the
    /// calling thread. Dropping the returned subscription unregisters it.
    pub fn on_cancel<F>(&self, listener: F) -> CancelSubscription
    where
        F: FnOnce(CancelReason) + Send + 'static,
    {
        let mut state = self.lock();
        if let Some(reason) = state.reason {
            drop(state);
            listener(reason);
            return CancelSubscription {
                token: Weak::new(),
                id: None,
            };
        }
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.push((id, Box::new(listener)));
        CancelSubscription {
            token: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    fn fire(&self, reason: CancelReason) {
        fire_inner(&self.inner, reason);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn fire_weak(weak: &Weak<CancelInner>, reason: CancelReason) {
    if let Some(inner) = weak.upgrade() {
        fire_inner(&inner, reason);
    }
}

fn fire_inner(inner: &CancelInner, reason: CancelReason) {
    let listeners = {
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.reason.is_some() {
            return;
        }
        state.reason = Some(reason);
        std::mem::take(&mut state.listeners)
    };
    debug!(reason = %reason, listeners = listeners.len(), "Cancel token fired");
    for (_, listener) in listeners {
        listener(reason);
    }
}

/// Registration returned by [`CancelToken::on_cancel`].
#[must_use = "dropping the subscription unregisters the listener"]
pub struct CancelSubscription {
    token: Weak<CancelInner>,
    id: Option<u64>,
}

impl Drop for CancelSubscription {
    fn drop(&mut self) {
        let (Some(id), Some(inner)) = (self.id, self.token.upgrade()) else {
            return;
        };
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
    }
}

/// Why [`run_cancellable`] did not produce the work's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The token fired before the work completed
    Canceled(CancelReason),
    /// The work panicked
    Panicked(String),
    /// The coroutine could not be spawned
    Spawn(String),
}

enum TaskEvent<T> {
    Completed(T),
    Panicked(String),
    Canceled(CancelReason),
}

/// Run `work` on its own coroutine and race it against `token`.
///
/// # Arguments
///
/// * `name` - Coroutine name, shows up in panics and debuggers
/// * `token` - Cancellation signal of the caller
/// * `stack_size` - Coroutine stack size in bytes
/// * `work` - The work to run
///
/// # Errors
///
/// [`TaskError::Canceled`] when the token wins (including a token that had
/// already fired, in which case the work is never started),
/// [`TaskError::Panicked`] when the work panics, [`TaskError::Spawn`] when
/// the coroutine cannot be created.
pub fn run_cancellable<T, F>(
    name: &str,
    token: &CancelToken,
    stack_size: usize,
    work: F,
) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if let Some(reason) = token.reason() {
        return Err(TaskError::Canceled(reason));
    }

    let (tx, rx) = mpsc::channel::<TaskEvent<T>>();
    let cancel_tx = tx.clone();
    let _subscription = token.on_cancel(move |reason| {
        let _ = cancel_tx.send(TaskEvent::Canceled(reason));
    });

    // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
    // The work is Send + 'static and reports through the channel, never by panicking
    // across the coroutine boundary.
    let spawn_result = unsafe {
        may::coroutine::Builder::new()
            .name(name.to_string())
            .stack_size(stack_size)
            .spawn(move || {
                let event = match catch_unwind(AssertUnwindSafe(work)) {
                    Ok(value) => TaskEvent::Completed(value),
                    Err(panic) => TaskEvent::Panicked(panic_message(panic.as_ref())),
                };
                // The receiver is gone when cancellation already won.
                let _ = tx.send(event);
            })
    };

    if let Err(e) = spawn_result {
        error!(
            task = %name,
            error = %e,
            stack_size = stack_size,
            "Failed to spawn task coroutine - CRITICAL"
        );
        return Err(TaskError::Spawn(e.to_string()));
    }

    match rx.recv() {
        Ok(TaskEvent::Completed(value)) => Ok(value),
        Ok(TaskEvent::Canceled(reason)) => Err(TaskError::Canceled(reason)),
        Ok(TaskEvent::Panicked(message)) => Err(TaskError::Panicked(message)),
        Err(e) => Err(TaskError::Panicked(format!("task ended without reporting: {e}"))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STACK: usize = 0x10000;

    #[test]
    fn completed_work_wins() {
        let token = CancelToken::new();
        let value = run_cancellable("sum", &token, STACK, || 2 + 2).unwrap();
        assert_eq!(value, 4);
        assert!(!token.is_canceled());
    }

    #[test]
    fn already_canceled_token_skips_work() {
        let token = CancelToken::new();
        token.cancel();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_task = Arc::clone(&ran);
        let result = run_cancellable("never", &token, STACK, move || {
            ran_in_task.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(result, Err(TaskError::Canceled(CancelReason::Canceled)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deadline_beats_hung_work() {
        let token = CancelToken::with_timeout(Duration::from_millis(50));
        let start = Instant::now();
        let result = run_cancellable("hung", &token, STACK, || {
            may::coroutine::sleep(Duration::from_secs(30));
        });
        assert_eq!(
            result,
            Err(TaskError::Canceled(CancelReason::DeadlineExceeded))
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn explicit_cancel_from_another_thread() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });
        let result = run_cancellable("hung", &token, STACK, || {
            may::coroutine::sleep(Duration::from_secs(30));
        });
        handle.join().unwrap();
        assert_eq!(result, Err(TaskError::Canceled(CancelReason::Canceled)));
    }

    #[test]
    fn listeners_fire_once_and_unsubscribe_on_drop() {
        let token = CancelToken::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let kept_hits = Arc::clone(&hits);
        let _kept = token.on_cancel(move |_| {
            kept_hits.fetch_add(1, Ordering::SeqCst);
        });
        let dropped_hits = Arc::clone(&hits);
        drop(token.on_cancel(move |_| {
            dropped_hits.fetch_add(10, Ordering::SeqCst);
        }));

        token.cancel();
        token.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(token.reason(), Some(CancelReason::Canceled));
    }

    #[test]
    fn late_subscriber_runs_immediately() {
        let token = CancelToken::new();
        token.cancel();
        let hits = Arc::new(AtomicUsize::new(0));
        let late_hits = Arc::clone(&hits);
        let _sub = token.on_cancel(move |reason| {
            assert_eq!(reason, CancelReason::Canceled);
            late_hits.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
