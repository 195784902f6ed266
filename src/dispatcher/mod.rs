//! # Dispatcher Module
//!
//! Routes a tagged request to its operation handler and turns the handler's
//! responder into the response the client under test observes.
//!
//! ## Request Flow
//!
//! 1. The operation id is read from the request extensions
//!    ([`crate::request::RequestExt::with_operation`]); its absence is
//!    [`crate::error::DispatchError::MissingOperationContext`]
//! 2. The rest of the work moves to its own coroutine and races the
//!    request's [`crate::task::CancelToken`]
//! 3. An installed interceptor may answer the request outright
//! 4. The operation is looked up; an unknown operation or unset handler is
//!    [`crate::error::DispatchError::NotImplemented`]
//! 5. By protocol:
//!    - **single-shot**: the handler runs and its responder is synthesized
//!    - **poller / pager**: the tracker is consulted for the request's
//!      identity (operation + path without poll/page suffix). The first call
//!      runs the handler and stores the flow; every call, the first included,
//!      advances it by one step. Terminal steps, error pages and status
//!      mismatches drop the flow so the next call starts over.
//! 6. Every emitted status is checked against the operation's acceptable set
//!
//! ## Concurrency
//!
//! Concurrent first calls for the same identity run the handler once: the
//! first caller reserves the identity, the others wait for it and then
//! advance the stored flow.
//!
//! ## Example
//!
//! ```rust
//! use fake_transport::dispatcher::Dispatcher;
//! use fake_transport::registry::{Operation, OperationRegistry};
//! use fake_transport::request::RequestExt;
//! use fake_transport::responder::Responder;
//! use fake_transport::runtime_config::RuntimeConfig;
//!
//! let registry = OperationRegistry::new().with(
//!     Operation::single("WidgetsClient.Delete", "/widgets/{name}")
//!         .unwrap()
//!         .accept(&[200, 204])
//!         .handler(|_| Ok(Responder::empty(204))),
//! );
//! let dispatcher = Dispatcher::builder(registry)
//!     .config(RuntimeConfig::default())
//!     .build();
//!
//! let request = http::Request::delete("https://fake.local/widgets/w1")
//!     .body(Vec::new())
//!     .unwrap()
//!     .with_operation("WidgetsClient.Delete");
//! let response = dispatcher.dispatch(request).unwrap();
//! assert_eq!(response.status(), 204);
//! ```

mod core;

pub use core::{
    Dispatcher, DispatcherBuilder, DispatcherStats, Transport, REQUEST_ID_HEADER,
};
