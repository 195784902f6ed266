use super::{Claim, Disposition, Reservation, Tracker, TrackingKey};
use crate::error::CancelReason;
use crate::task::CancelToken;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn key(path: &str) -> TrackingKey {
    TrackingKey::new(Arc::from("WidgetsClient.BeginCreate"), path)
}

#[test]
fn test_key_ignores_tracking_suffixes() {
    assert_eq!(key("/widgets/w1"), key("/widgets/w1/get/fake/status"));
    assert_eq!(key("/widgets"), key("/widgets/page_4"));
    assert_ne!(key("/widgets/w1"), key("/widgets/w2"));
    assert_ne!(
        key("/widgets/w1"),
        TrackingKey::new(Arc::from("WidgetsClient.BeginDelete"), "/widgets/w1")
    );
}

#[test]
fn test_register_is_first_writer_wins() {
    let tracker: Tracker<&'static str> = Tracker::new();
    assert!(tracker.register(key("/widgets/w1"), "first"));
    assert!(!tracker.register(key("/widgets/w1"), "second"));
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.remove(&key("/widgets/w1")), Some("first"));
    assert!(tracker.is_empty());
}

#[test]
fn test_concurrent_register_stores_one_state() {
    let tracker: Tracker<usize> = Tracker::new();
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let tracker = tracker.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                tracker.register(key("/widgets/w1"), i)
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(tracker.len(), 1);
}

#[test]
fn test_advance_removes_on_terminal_step() {
    let tracker: Tracker<u32> = Tracker::new();
    let k = key("/widgets/w1");
    tracker.register(k.clone(), 0);

    for expected in 1..3 {
        let step = tracker.advance(&k, |count| {
            *count += 1;
            (*count, Disposition::Keep)
        });
        assert_eq!(step, Some(expected));
    }
    let last = tracker.advance(&k, |count| (*count + 1, Disposition::Remove));
    assert_eq!(last, Some(3));
    assert!(!tracker.contains(&k));
    assert_eq!(tracker.advance(&k, |count| (*count, Disposition::Keep)), None);
}

fn reserve(tracker: &Tracker<u32>, k: &TrackingKey) -> Reservation<u32> {
    match tracker.claim(k) {
        Claim::Reserved(reservation) => reservation,
        _ => panic!("expected reservation"),
    }
}

#[test]
fn test_claim_reserves_then_tracks() {
    let tracker: Tracker<u32> = Tracker::new();
    let k = key("/widgets/w1");
    let reservation = match tracker.claim(&k) {
        Claim::Reserved(reservation) => reservation,
        _ => panic!("expected reservation"),
    };
    assert!(!tracker.contains(&k));
    assert!(reservation.fulfill(7));
    assert!(matches!(tracker.claim(&k), Claim::Tracked));
    assert_eq!(tracker.keys(), vec![k]);
}

#[test]
fn test_dropped_reservation_releases_key() {
    let tracker: Tracker<u32> = Tracker::new();
    let k = key("/widgets/w1");
    match tracker.claim(&k) {
        Claim::Reserved(reservation) => drop(reservation),
        _ => panic!("expected reservation"),
    }
    assert!(matches!(tracker.claim(&k), Claim::Reserved(_)));
}

#[test]
fn test_register_over_pending_wins_and_reservation_joins() {
    let tracker: Tracker<u32> = Tracker::new();
    let k = key("/widgets/w1");
    let reservation = match tracker.claim(&k) {
        Claim::Reserved(reservation) => reservation,
        _ => panic!("expected reservation"),
    };
    assert!(tracker.register(k.clone(), 1));
    assert!(!reservation.fulfill(2));
    assert_eq!(tracker.remove(&k), Some(1));
}

#[test]
fn test_waiters_join_single_initialization() {
    let tracker: Tracker<u32> = Tracker::new();
    let initializations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(6));
    let k = key("/widgets/w1");

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let tracker = tracker.clone();
            let initializations = Arc::clone(&initializations);
            let barrier = Arc::clone(&barrier);
            let k = k.clone();
            std::thread::spawn(move || {
                barrier.wait();
                loop {
                    match tracker.claim(&k) {
                        Claim::Tracked => return,
                        Claim::Wait(waiter) => waiter.wait(),
                        Claim::Reserved(reservation) => {
                            initializations.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            reservation.fulfill(42);
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(initializations.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.len(), 1);
}

#[test]
fn test_canceled_owner_releases_key_and_late_state_is_dropped() {
    let tracker: Tracker<u32> = Tracker::new();
    let k = key("/widgets/w1");
    let token = CancelToken::new();
    let mut abandoned = reserve(&tracker, &k);
    abandoned.release_on_cancel(&token);
    assert!(abandoned.is_held());

    token.cancel();
    assert!(!abandoned.is_held());

    let fresh = reserve(&tracker, &k);
    assert!(!abandoned.fulfill(1));
    assert!(fresh.fulfill(2));
    assert_eq!(tracker.remove(&k), Some(2));
}

#[test]
fn test_release_on_already_fired_token() {
    let tracker: Tracker<u32> = Tracker::new();
    let k = key("/widgets/w1");
    let token = CancelToken::new();
    token.cancel();
    let mut reservation = reserve(&tracker, &k);
    reservation.release_on_cancel(&token);
    assert!(!reservation.is_held());
    assert!(!reservation.fulfill(1));
    assert!(tracker.is_empty());
}

#[test]
fn test_waiter_gives_up_when_its_token_fires() {
    let tracker: Tracker<u32> = Tracker::new();
    let k = key("/widgets/w1");
    let owner = reserve(&tracker, &k);
    let waiter = match tracker.claim(&k) {
        Claim::Wait(waiter) => waiter,
        _ => panic!("expected waiter"),
    };

    let token = CancelToken::with_timeout(Duration::from_millis(20));
    assert_eq!(waiter.wait_or_cancel(&token), Err(CancelReason::DeadlineExceeded));
    assert!(owner.is_held());
    assert!(owner.fulfill(3));
}

#[test]
fn test_waiter_wakes_on_fulfill_before_its_token_fires() {
    let tracker: Tracker<u32> = Tracker::new();
    let k = key("/widgets/w1");
    let owner = reserve(&tracker, &k);
    let waiter = match tracker.claim(&k) {
        Claim::Wait(waiter) => waiter,
        _ => panic!("expected waiter"),
    };

    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        owner.fulfill(4)
    });
    let token = CancelToken::with_timeout(Duration::from_secs(5));
    assert_eq!(waiter.wait_or_cancel(&token), Ok(()));
    assert!(handle.join().unwrap());
    assert!(tracker.contains(&k));
}
