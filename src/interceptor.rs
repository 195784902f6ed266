//! # Interceptor Module
//!
//! A hook consulted before normal dispatch. When an interceptor is installed
//! and answers a request, its response (or error) is returned as-is and the
//! operation's handler is never invoked; when it declines, dispatch proceeds.
//!
//! Slots are swapped atomically, so installing or resetting an interceptor
//! while dispatches are in flight is safe: each dispatch observes either the
//! old or the new interceptor.
//!
//! ```rust
//! use fake_transport::interceptor::InterceptorSlot;
//!
//! let slot = InterceptorSlot::new();
//! slot.install_fn(|request| {
//!     (request.uri().path() == "/health").then(|| {
//!         Ok(http::Response::new(b"ok".to_vec()))
//!     })
//! });
//! assert!(slot.is_installed());
//! slot.reset();
//! ```

use crate::error::DispatchError;
use crate::synth::SimResponse;
use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::{debug, info};

/// A hook that may answer a request before handler dispatch.
pub trait Interceptor: Send + Sync {
    /// Return `Some` to short-circuit dispatch, `None` to let it proceed.
    fn intercept(
        &self,
        request: &http::Request<Vec<u8>>,
    ) -> Option<Result<SimResponse, DispatchError>>;
}

impl<F> Interceptor for F
where
    F: Fn(&http::Request<Vec<u8>>) -> Option<Result<SimResponse, DispatchError>> + Send + Sync,
{
    fn intercept(
        &self,
        request: &http::Request<Vec<u8>>,
    ) -> Option<Result<SimResponse, DispatchError>> {
        self(request)
    }
}

struct Installed(Box<dyn Interceptor>);

/// Atomically swappable holder of at most one interceptor.
///
/// Cloning yields another handle to the same slot.
#[derive(Clone, Default)]
pub struct InterceptorSlot {
    current: Arc<ArcSwapOption<Installed>>,
}

static GLOBAL: Lazy<InterceptorSlot> = Lazy::new(InterceptorSlot::new);

impl InterceptorSlot {
    /// Empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide slot shared by dispatchers built with
    /// [`crate::dispatcher::DispatcherBuilder::global_interceptor`].
    #[must_use]
    pub fn global() -> &'static InterceptorSlot {
        &GLOBAL
    }

    /// Install `interceptor`, replacing any previous one.
    pub fn install<I>(&self, interceptor: I)
    where
        I: Interceptor + 'static,
    {
        let previous = self
            .current
            .swap(Some(Arc::new(Installed(Box::new(interceptor)))));
        info!(replaced = previous.is_some(), "Interceptor installed");
    }

    /// Install a closure as the interceptor.
    pub fn install_fn<F>(&self, interceptor: F)
    where
        F: Fn(&http::Request<Vec<u8>>) -> Option<Result<SimResponse, DispatchError>>
            + Send
            + Sync
            + 'static,
    {
        self.install(interceptor);
    }

    /// Remove the interceptor; returns whether one was installed.
    pub fn reset(&self) -> bool {
        let removed = self.current.swap(None).is_some();
        if removed {
            info!("Interceptor reset");
        }
        removed
    }

    /// Whether an interceptor is installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.current.load().is_some()
    }

    /// Consult the installed interceptor, if any.
    pub fn intercept(
        &self,
        request: &http::Request<Vec<u8>>,
    ) -> Option<Result<SimResponse, DispatchError>> {
        let installed = self.current.load_full()?;
        let outcome = installed.0.intercept(request);
        debug!(
            path = %request.uri().path(),
            answered = outcome.is_some(),
            "Interceptor consulted"
        );
        outcome
    }
}

impl std::fmt::Debug for InterceptorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorSlot")
            .field("installed", &self.is_installed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> http::Request<Vec<u8>> {
        http::Request::get(path).body(Vec::new()).unwrap()
    }

    #[test]
    fn empty_slot_declines() {
        let slot = InterceptorSlot::new();
        assert!(!slot.is_installed());
        assert!(slot.intercept(&request("/a")).is_none());
        assert!(!slot.reset());
    }

    #[test]
    fn install_replaces_and_reset_clears() {
        let slot = InterceptorSlot::new();
        slot.install_fn(|_| Some(Ok(http::Response::new(b"one".to_vec()))));
        slot.install_fn(|_| Some(Ok(http::Response::new(b"two".to_vec()))));
        let response = slot.intercept(&request("/a")).unwrap().unwrap();
        assert_eq!(response.body(), b"two");
        assert!(slot.reset());
        assert!(slot.intercept(&request("/a")).is_none());
    }

    #[test]
    fn clones_share_the_slot() {
        let slot = InterceptorSlot::new();
        let other = slot.clone();
        slot.install_fn(|_| Some(Err(DispatchError::MissingOperationContext)));
        assert!(matches!(
            other.intercept(&request("/a")),
            Some(Err(DispatchError::MissingOperationContext))
        ));
    }
}
