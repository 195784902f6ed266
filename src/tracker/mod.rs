//! # Tracker Module
//!
//! The tracker remembers in-progress multi-call protocols (LRO pollers and
//! pagers) between otherwise stateless simulated HTTP calls.
//!
//! ## Overview
//!
//! A client drives a poller or a pager by issuing a sequence of requests that
//! all share one *logical request identity*: the operation id plus the request
//! path with any simulator-appended poll/page suffix stripped
//! ([`TrackingKey`]). The tracker maps that identity to the protocol state the
//! next call needs.
//!
//! ## Concurrency
//!
//! All reads and writes go through a single mutex. Hold times are a map
//! operation plus, for [`Tracker::advance`], one step of the stored responder;
//! handler execution never happens under the lock.
//!
//! First-time registration is first-writer-wins: [`Tracker::register`] stores
//! the state only if none is stored yet and reports whether it did. The
//! dispatcher goes one step further with [`Tracker::claim`]: the first caller
//! reserves the identity before invoking its handler, concurrent callers wait
//! on the reservation and join the state it publishes, so one identity sees
//! one handler invocation.
//!
//! A reservation is tied to its owner's cancel token. When the owner's
//! dispatch is abandoned the identity is released at once and the state its
//! handler eventually produces is discarded; waiters give up on their own
//! token as well.
//!
//! Waiting uses `may` channels, which park a coroutine without blocking the
//! worker thread it runs on.

mod core;
#[cfg(test)]
mod tests;

pub use core::{Claim, Disposition, Reservation, Tracker, TrackingKey, Waiter};
