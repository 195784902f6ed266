use crate::error::CancelReason;
use crate::matcher::sanitize_tracked_path;
use crate::task::{CancelSubscription, CancelToken};
use may::sync::mpsc;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Logical request identity of one poll or page loop.
///
/// Built from the operation id and the request path with any poll/page
/// suffix stripped. The query string is never part of the key because it
/// changes from call to call (continuation tokens, api-version bumps).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingKey {
    operation: Arc<str>,
    path: String,
}

impl TrackingKey {
    /// Build the key for `operation` and a raw request path.
    #[must_use]
    pub fn new(operation: Arc<str>, path: &str) -> Self {
        Self {
            operation,
            path: sanitize_tracked_path(path).to_string(),
        }
    }

    /// Operation id part of the key.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Sanitized path part of the key.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.path)
    }
}

/// What [`Tracker::advance`] should do with the entry after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// More calls are expected; keep the state
    Keep,
    /// The flow reached a terminal state; drop the entry
    Remove,
}

static NEXT_RESERVATION: AtomicU64 = AtomicU64::new(0);

enum Slot<S> {
    /// A caller is computing the initial state; others wait on these senders
    Pending {
        reservation: u64,
        waiters: Vec<mpsc::Sender<()>>,
    },
    /// Published state
    Ready(S),
}

type Entries<S> = Arc<Mutex<HashMap<TrackingKey, Slot<S>>>>;

fn lock_entries<S>(entries: &Entries<S>) -> MutexGuard<'_, HashMap<TrackingKey, Slot<S>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wake(waiters: Vec<mpsc::Sender<()>>) {
    for waiter in waiters {
        // A waiter whose dispatch was cancelled has dropped its receiver.
        let _ = waiter.send(());
    }
}

/// Drop the pending slot of `key` if `reservation` still owns it.
fn release<S>(entries: &Entries<S>, key: &TrackingKey, reservation: u64) -> bool {
    let mut guard = lock_entries(entries);
    let waiters = match guard.get_mut(key) {
        Some(Slot::Pending {
            reservation: owner,
            waiters,
        }) if *owner == reservation => std::mem::take(waiters),
        _ => return false,
    };
    guard.remove(key);
    drop(guard);
    debug!(key = %key, waiters = waiters.len(), "Reservation released");
    wake(waiters);
    true
}

/// Concurrency-safe store of in-progress multi-call protocol state.
///
/// Cloning yields another handle to the same store.
pub struct Tracker<S> {
    entries: Entries<S>,
}

impl<S> Clone for Tracker<S> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<S> Default for Tracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for Tracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker").field("tracked", &self.len()).finish()
    }
}

/// Outcome of [`Tracker::claim`].
pub enum Claim<S> {
    /// State is already stored for the key; advance it
    Tracked,
    /// Nobody tracks the key; the caller owns the reservation and must
    /// fulfill it (or drop it to release the key)
    Reserved(Reservation<S>),
    /// Another caller holds the reservation; wait, then claim again
    Wait(Waiter),
}

impl<S> Tracker<S> {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Decide how a dispatch for `key` should proceed.
    pub fn claim(&self, key: &TrackingKey) -> Claim<S> {
        let mut entries = lock_entries(&self.entries);
        match entries.get_mut(key) {
            Some(Slot::Ready(_)) => Claim::Tracked,
            Some(Slot::Pending { waiters, .. }) => {
                let (tx, rx) = mpsc::channel();
                waiters.push(tx.clone());
                debug!(key = %key, waiters = waiters.len(), "Joining pending registration");
                Claim::Wait(Waiter { tx, rx })
            }
            None => {
                let reservation = NEXT_RESERVATION.fetch_add(1, Ordering::Relaxed);
                entries.insert(
                    key.clone(),
                    Slot::Pending {
                        reservation,
                        waiters: Vec::new(),
                    },
                );
                debug!(key = %key, reservation = reservation, "Tracking identity reserved");
                Claim::Reserved(Reservation {
                    entries: Arc::clone(&self.entries),
                    key: key.clone(),
                    id: reservation,
                    fulfilled: false,
                    on_cancel: None,
                })
            }
        }
    }

    /// Store `state` for `key` unless state is already stored.
    ///
    /// First writer wins: returns `true` if this call stored the state and
    /// `false` if an earlier registration is kept. A pending reservation does
    /// not count as stored; registering over it publishes `state` and wakes
    /// the reservation's waiters.
    pub fn register(&self, key: TrackingKey, state: S) -> bool {
        let mut entries = lock_entries(&self.entries);
        let waiters = match entries.get_mut(&key) {
            Some(Slot::Ready(_)) => {
                debug!(key = %key, "Registration ignored, identity already tracked");
                return false;
            }
            Some(Slot::Pending { waiters, .. }) => std::mem::take(waiters),
            None => Vec::new(),
        };
        info!(key = %key, "Tracked flow registered");
        entries.insert(key, Slot::Ready(state));
        drop(entries);
        wake(waiters);
        true
    }

    /// Run one step of the stored state for `key` under the lock.
    ///
    /// Returns `None` if no state is stored (never registered, still pending,
    /// or already removed). When `step` answers [`Disposition::Remove`] the
    /// entry is dropped before the lock is released, so the next call for
    /// the key starts a fresh flow.
    pub fn advance<R>(
        &self,
        key: &TrackingKey,
        step: impl FnOnce(&mut S) -> (R, Disposition),
    ) -> Option<R> {
        let mut entries = lock_entries(&self.entries);
        let Some(Slot::Ready(state)) = entries.get_mut(key) else {
            return None;
        };
        let (result, disposition) = step(state);
        if disposition == Disposition::Remove {
            entries.remove(key);
            debug!(key = %key, remaining = entries.len(), "Tracked flow finished");
        }
        Some(result)
    }

    /// Whether state is stored for `key`.
    #[must_use]
    pub fn contains(&self, key: &TrackingKey) -> bool {
        matches!(lock_entries(&self.entries).get(key), Some(Slot::Ready(_)))
    }

    /// Remove and return the stored state for `key`.
    ///
    /// Pending reservations are left alone; their owner releases them.
    pub fn remove(&self, key: &TrackingKey) -> Option<S> {
        let mut entries = lock_entries(&self.entries);
        if !matches!(entries.get(key), Some(Slot::Ready(_))) {
            return None;
        }
        match entries.remove(key) {
            Some(Slot::Ready(state)) => Some(state),
            _ => None,
        }
    }

    /// Number of identities with stored state.
    #[must_use]
    pub fn len(&self) -> usize {
        lock_entries(&self.entries)
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Whether no state is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities with stored state, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<TrackingKey> {
        lock_entries(&self.entries)
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Exclusive right to publish the initial state for a key.
///
/// Dropping it without calling [`Reservation::fulfill`] releases the key and
/// wakes every waiter, one of which will then reserve it again. A
/// reservation tied to a [`CancelToken`] with [`Reservation::release_on_cancel`]
/// is released as soon as that token fires, even while its owner is still
/// computing the state; a later `fulfill` is then discarded.
#[must_use = "dropping a reservation releases the key"]
pub struct Reservation<S> {
    entries: Entries<S>,
    key: TrackingKey,
    id: u64,
    fulfilled: bool,
    on_cancel: Option<CancelSubscription>,
}

impl<S: Send + 'static> Reservation<S> {
    /// Release the key when `token` fires.
    pub fn release_on_cancel(&mut self, token: &CancelToken) {
        let entries = Arc::clone(&self.entries);
        let key = self.key.clone();
        let id = self.id;
        self.on_cancel = Some(token.on_cancel(move |reason| {
            if release(&entries, &key, id) {
                info!(key = %key, reason = %reason, "Reservation abandoned by its owner");
            }
        }));
    }
}

impl<S> Reservation<S> {
    /// Key this reservation holds.
    #[must_use]
    pub fn key(&self) -> &TrackingKey {
        &self.key
    }

    /// Whether the key is still reserved by this reservation.
    #[must_use]
    pub fn is_held(&self) -> bool {
        matches!(
            lock_entries(&self.entries).get(&self.key),
            Some(Slot::Pending { reservation, .. }) if *reservation == self.id
        )
    }

    /// Publish `state` and wake waiters.
    ///
    /// Returns `false` and drops `state` if the key is no longer reserved by
    /// this reservation: state was registered for it in the meantime (first
    /// writer wins, the caller joins the stored one), or the reservation was
    /// released on cancellation.
    pub fn fulfill(mut self, state: S) -> bool {
        self.fulfilled = true;
        let mut entries = lock_entries(&self.entries);
        let waiters = match entries.get_mut(&self.key) {
            Some(Slot::Pending {
                reservation,
                waiters,
            }) if *reservation == self.id => std::mem::take(waiters),
            Some(Slot::Ready(_)) => {
                debug!(key = %self.key, "Reservation lost to an earlier registration");
                return false;
            }
            _ => {
                debug!(key = %self.key, "Reservation released before fulfillment");
                return false;
            }
        };
        info!(key = %self.key, waiters = waiters.len(), "Tracked flow registered");
        entries.insert(self.key.clone(), Slot::Ready(state));
        drop(entries);
        wake(waiters);
        true
    }
}

impl<S> Drop for Reservation<S> {
    fn drop(&mut self) {
        if !self.fulfilled {
            release(&self.entries, &self.key, self.id);
        }
    }
}

/// Handle for waiting on another caller's reservation.
pub struct Waiter {
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
}

impl Waiter {
    /// Block (or park the coroutine) until the reservation is fulfilled or
    /// released.
    pub fn wait(self) {
        drop(self.tx);
        // A disconnect means the reservation went away; either way, re-claim.
        let _ = self.rx.recv();
    }

    /// Like [`Waiter::wait`], but give up when `token` fires.
    ///
    /// # Errors
    ///
    /// The token's reason when it fired before or while waiting.
    pub fn wait_or_cancel(self, token: &CancelToken) -> Result<(), CancelReason> {
        let Self { tx, rx } = self;
        let subscription = token.on_cancel(move |_| {
            let _ = tx.send(());
        });
        let _ = rx.recv();
        drop(subscription);
        token.reason().map_or(Ok(()), Err)
    }
}
