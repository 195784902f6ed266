//! # fake-transport
//!
//! **fake-transport** is an in-process HTTP transport for testing service clients without a
//! network. A test declares the operations a client can call (id, URL template, protocol,
//! acceptable statuses) and gives each a handler that returns a scripted responder. Requests
//! issued by the client under test are routed to those handlers, and the responders are turned
//! into the wire responses the client's real pipeline deserializes.
//!
//! ## Overview
//!
//! Three call protocols are simulated:
//!
//! - **Single-shot** operations: one request, one response
//! - **Long-running operations** (pollers): the first call returns the first scripted step with a
//!   `location` header pointing at a synthetic poll path; each following poll returns the next
//!   step until the terminal one (success, failure or cancellation)
//! - **Paged lists** (pagers): the first call returns the first page; every page that has a
//!   successor carries a continuation link, and following that link returns the next page
//!
//! Multi-call state lives in a tracker keyed by operation and request path, so the handler runs
//! once per flow no matter how many concurrent first calls race for it.
//!
//! ## Architecture
//!
//! - **[`matcher`]** - URL template compilation and path parameter extraction
//! - **[`registry`]** - Operation table with typed per-protocol builders
//! - **[`responder`]** - Scripted responses, errors, poll steps and pages
//! - **[`tracker`]** - Concurrency-safe store of in-progress pollers and pagers
//! - **[`synth`]** - Responder to wire response conversion
//! - **[`dispatcher`]** - Request routing, protocol state machines, status validation
//! - **[`task`]** - Cancellation-aware execution of dispatch work on `may` coroutines
//! - **[`interceptor`]** - Hook that may answer a request before dispatch
//! - **[`factory`]** - Multi-client routing by operation id prefix
//! - **[`request`]** - Request extensions and handler-side request helpers
//!
//! ### Dispatch Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client as Client under test
//!     participant Disp as Dispatcher
//!     participant Task as Task<br/>(Coroutine)
//!     participant Icpt as Interceptor
//!     participant Trk as Tracker
//!     participant Handler as Handler
//!
//!     Client->>Disp: http::Request + OperationId
//!     Disp->>Task: run_cancellable(work, token)
//!     Task->>Icpt: intercept(&request)
//!     alt Interceptor answers
//!         Icpt-->>Client: response / error
//!     else Declines
//!         Task->>Trk: claim(operation, path)
//!         alt First call of a flow
//!             Task->>Handler: handler(&OperationRequest)
//!             Handler-->>Task: PollerResponder / PagerResponder
//!             Task->>Trk: fulfill(flow)
//!         end
//!         Task->>Trk: advance(one step)
//!         Trk-->>Task: step (flow dropped when terminal)
//!         Task->>Task: check status, synthesize
//!         Task-->>Client: http::Response
//!     end
//!     Note over Disp,Task: cancellation or deadline wins: DispatchError::Canceled
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fake_transport::prelude::*;
//! use serde_json::json;
//!
//! let registry = OperationRegistry::new().with(
//!     Operation::poller("WidgetsClient.BeginCreate", "/widgets/{widgetName}")
//!         .unwrap()
//!         .handler(|req| {
//!             let mut poller = PollerResponder::new();
//!             poller.add_non_terminal_response(201);
//!             poller.set_terminal_response(Responder::json(
//!                 200,
//!                 json!({"name": req.path_param("widgetName")?}),
//!             ));
//!             Ok(poller)
//!         }),
//! );
//! let dispatcher = Dispatcher::builder(registry)
//!     .config(RuntimeConfig::default())
//!     .build();
//!
//! let begin = http::Request::put("https://fake.local/widgets/w1")
//!     .body(Vec::new())
//!     .unwrap()
//!     .with_operation("WidgetsClient.BeginCreate");
//! let first = dispatcher.dispatch(begin).unwrap();
//! assert_eq!(first.status(), 201);
//! let poll_url = first.headers()["location"].to_str().unwrap().to_string();
//!
//! let poll = http::Request::get(poll_url)
//!     .body(Vec::new())
//!     .unwrap()
//!     .with_operation("WidgetsClient.BeginCreate");
//! let done = dispatcher.dispatch(poll).unwrap();
//! assert_eq!(done.status(), 200);
//! ```
//!
//! ## Configuration
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `FAKE_TRANSPORT_STACK_SIZE` | `0x40000` | Dispatch coroutine stack size |
//! | `FAKE_TRANSPORT_DISPATCH_TIMEOUT_MS` | unset | Deadline for requests without a token |
//! | `FAKE_TRANSPORT_LOG_LEVEL` | `info` | See [`logging`] |
//! | `FAKE_TRANSPORT_LOG_FORMAT` | `json` | `json` or `pretty` |

pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod ids;
pub mod interceptor;
pub mod logging;
pub mod matcher;
pub mod registry;
pub mod request;
pub mod responder;
pub mod runtime_config;
pub mod synth;
pub mod task;
pub mod tracker;

pub use dispatcher::{Dispatcher, DispatcherBuilder, Transport};
pub use error::{DispatchError, SimulatedFailure, TemplateError};
pub use factory::ServerFactory;
pub use interceptor::{Interceptor, InterceptorSlot};
pub use registry::{HandlerError, HandlerResult, Operation, OperationRegistry};
pub use request::{OperationId, OperationRequest, RequestExt};
pub use responder::{ErrorResponder, PagerResponder, PollerResponder, Responder};
pub use synth::SimResponse;
pub use task::CancelToken;

/// Everything a test needs to declare operations and drive a dispatcher.
pub mod prelude {
    pub use crate::dispatcher::{Dispatcher, Transport};
    pub use crate::error::DispatchError;
    pub use crate::factory::ServerFactory;
    pub use crate::interceptor::InterceptorSlot;
    pub use crate::registry::{HandlerError, HandlerResult, Operation, OperationRegistry};
    pub use crate::request::{OperationRequest, RequestExt};
    pub use crate::responder::{ErrorResponder, PagerResponder, PollerResponder, Responder};
    pub use crate::runtime_config::RuntimeConfig;
    pub use crate::synth::NextLinkInjector;
    pub use crate::task::CancelToken;
}
