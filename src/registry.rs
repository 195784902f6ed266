//! # Registry Module
//!
//! Operation table of a fake server.
//!
//! Each operation is declared once with its id, URL template, kind and the
//! statuses its contract accepts, then optionally given a handler. The kind
//! is carried in the type of the [`Operation`] builder, so a poller can only
//! be given a handler that returns a [`PollerResponder`], a pager one that
//! returns a [`PagerResponder`], and everything else one that returns a
//! [`Responder`].
//!
//! ```rust
//! use fake_transport::registry::{Operation, OperationRegistry};
//! use fake_transport::responder::Responder;
//! use serde_json::json;
//!
//! let mut registry = OperationRegistry::new();
//! registry.add(
//!     Operation::single("WidgetsClient.Get", "/widgets/{widgetName}")
//!         .unwrap()
//!         .handler(|req| Ok(Responder::json(200, json!({"name": req.path_param("widgetName")?})))),
//! );
//! // Declared without a handler: dispatch reports "not implemented".
//! registry.add(Operation::poller("WidgetsClient.BeginDelete", "/widgets/{widgetName}").unwrap());
//! assert_eq!(registry.operation_ids(), vec!["WidgetsClient.BeginDelete", "WidgetsClient.Get"]);
//! ```

use crate::error::{DispatchError, TemplateError};
use crate::matcher::PathTemplate;
use crate::request::{OperationId, OperationRequest};
use crate::responder::{ErrorResponder, PagerResponder, PollerResponder, Responder};
use crate::synth::NextLinkInjector;
use http::Method;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Why a handler did not produce a responder.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// Fail the call with a simulated backend error
    Backend(ErrorResponder),
    /// Fail the dispatch itself (e.g. a malformed request)
    Dispatch(DispatchError),
}

impl From<ErrorResponder> for HandlerError {
    fn from(error: ErrorResponder) -> Self {
        HandlerError::Backend(error)
    }
}

impl From<DispatchError> for HandlerError {
    fn from(error: DispatchError) -> Self {
        HandlerError::Dispatch(error)
    }
}

impl From<HandlerError> for DispatchError {
    fn from(error: HandlerError) -> Self {
        match error {
            HandlerError::Backend(error) => DispatchError::SimulatedBackend(error.into_failure()),
            HandlerError::Dispatch(error) => error,
        }
    }
}

/// Result type of operation handlers.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Handler of a single-shot operation.
pub type SingleHandler = Arc<dyn Fn(&OperationRequest) -> HandlerResult<Responder> + Send + Sync>;
/// Handler of a long-running operation.
pub type PollerHandler =
    Arc<dyn Fn(&OperationRequest) -> HandlerResult<PollerResponder> + Send + Sync>;
/// Handler of a paged list operation.
pub type PagerHandler = Arc<dyn Fn(&OperationRequest) -> HandlerResult<PagerResponder> + Send + Sync>;

/// A registered handler, tagged with its protocol.
#[derive(Clone)]
pub enum OperationHandler {
    /// One request, one response
    Single(SingleHandler),
    /// Long-running operation
    Poller(PollerHandler),
    /// Paged list
    Pager(PagerHandler),
}

impl fmt::Debug for OperationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationHandler::Single(_) => "Single(..)",
            OperationHandler::Poller(_) => "Poller(..)",
            OperationHandler::Pager(_) => "Pager(..)",
        })
    }
}

/// Call protocol of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// One request, one response
    SingleShot,
    /// Long-running operation polled to completion
    Poller,
    /// List walked page by page
    Pager,
}

/// Builder marker for single-shot operations.
#[derive(Debug)]
pub enum Single {}
/// Builder marker for long-running operations.
#[derive(Debug)]
pub enum Poller {}
/// Builder marker for paged operations.
#[derive(Debug)]
pub enum Pager {}

/// Maps a builder marker to its [`OperationKind`].
pub trait KindMarker {
    /// Kind of operations built with this marker
    const KIND: OperationKind;
    /// Statuses accepted when none are declared
    const DEFAULT_ACCEPT: &'static [u16];
}

impl KindMarker for Single {
    const KIND: OperationKind = OperationKind::SingleShot;
    const DEFAULT_ACCEPT: &'static [u16] = &[200];
}

impl KindMarker for Poller {
    const KIND: OperationKind = OperationKind::Poller;
    const DEFAULT_ACCEPT: &'static [u16] = &[200, 201, 202, 204];
}

impl KindMarker for Pager {
    const KIND: OperationKind = OperationKind::Pager;
    const DEFAULT_ACCEPT: &'static [u16] = &[200];
}

/// Inline capacity of an acceptable-status set.
pub type StatusSet = SmallVec<[u16; 4]>;

/// A registered operation.
#[derive(Debug, Clone)]
pub struct OperationEntry {
    /// Operation id
    pub id: OperationId,
    /// Compiled URL template
    pub template: PathTemplate,
    /// Call protocol
    pub kind: OperationKind,
    /// Required request method, when declared
    pub method: Option<Method>,
    /// Statuses the operation's contract accepts
    pub acceptable: StatusSet,
    /// Handler; `None` until the test sets one
    pub handler: Option<OperationHandler>,
    /// Continuation link writer (pagers only)
    pub next_link: NextLinkInjector,
}

impl OperationEntry {
    /// Whether `status` is in the acceptable set.
    #[must_use]
    pub fn accepts(&self, status: u16) -> bool {
        self.acceptable.contains(&status)
    }

    /// Reject a status outside the acceptable set.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnexpectedStatusCode`].
    pub fn check_status(&self, status: u16) -> Result<(), DispatchError> {
        if self.accepts(status) {
            Ok(())
        } else {
            Err(DispatchError::UnexpectedStatusCode {
                operation: Arc::clone(self.id.as_arc()),
                status,
                acceptable: self.acceptable.to_vec(),
            })
        }
    }
}

/// Typed builder of one operation.
pub struct Operation<K> {
    entry: OperationEntry,
    _kind: PhantomData<K>,
}

impl<K: KindMarker> Operation<K> {
    fn declare(id: &str, template: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            entry: OperationEntry {
                id: OperationId::from(id),
                template: PathTemplate::compile(template)?,
                kind: K::KIND,
                method: None,
                acceptable: K::DEFAULT_ACCEPT.iter().copied().collect(),
                handler: None,
                next_link: NextLinkInjector::default(),
            },
            _kind: PhantomData,
        })
    }

    /// Replace the acceptable status set.
    #[must_use]
    pub fn accept(mut self, statuses: &[u16]) -> Self {
        self.entry.acceptable = statuses.iter().copied().collect();
        self
    }

    /// Require a request method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.entry.method = Some(method);
        self
    }

    /// The entry as it would be registered.
    #[must_use]
    pub fn entry(&self) -> &OperationEntry {
        &self.entry
    }
}

impl Operation<Single> {
    /// Declare a single-shot operation.
    ///
    /// # Errors
    ///
    /// Returns the template compilation error.
    pub fn single(id: &str, template: &str) -> Result<Self, TemplateError> {
        Self::declare(id, template)
    }

    /// Set the handler.
    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&OperationRequest) -> HandlerResult<Responder> + Send + Sync + 'static,
    {
        self.entry.handler = Some(OperationHandler::Single(Arc::new(handler)));
        self
    }
}

impl Operation<Poller> {
    /// Declare a long-running operation.
    ///
    /// # Errors
    ///
    /// Returns the template compilation error.
    pub fn poller(id: &str, template: &str) -> Result<Self, TemplateError> {
        Self::declare(id, template)
    }

    /// Set the handler; it runs once per tracked flow.
    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&OperationRequest) -> HandlerResult<PollerResponder> + Send + Sync + 'static,
    {
        self.entry.handler = Some(OperationHandler::Poller(Arc::new(handler)));
        self
    }
}

impl Operation<Pager> {
    /// Declare a paged list operation.
    ///
    /// Continuation links go into the `nextLink` field unless
    /// [`Operation::next_link`] says otherwise.
    ///
    /// # Errors
    ///
    /// Returns the template compilation error.
    pub fn pager(id: &str, template: &str) -> Result<Self, TemplateError> {
        Self::declare(id, template)
    }

    /// Set the handler; it runs once per tracked flow.
    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&OperationRequest) -> HandlerResult<PagerResponder> + Send + Sync + 'static,
    {
        self.entry.handler = Some(OperationHandler::Pager(Arc::new(handler)));
        self
    }

    /// Set how continuation links are written into pages.
    #[must_use]
    pub fn next_link(mut self, injector: NextLinkInjector) -> Self {
        self.entry.next_link = injector;
        self
    }
}

/// Operation table keyed by operation id.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    entries: HashMap<Arc<str>, Arc<OperationEntry>>,
}

impl OperationRegistry {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation, replacing any earlier one with the same id.
    pub fn add<K: KindMarker>(&mut self, operation: Operation<K>) -> &mut Self {
        let entry = operation.entry;
        let id = Arc::clone(entry.id.as_arc());
        if self.entries.insert(Arc::clone(&id), Arc::new(entry)).is_some() {
            warn!(operation = %id, "Operation registered twice, keeping the latest");
        }
        self
    }

    /// Builder-style [`OperationRegistry::add`].
    #[must_use]
    pub fn with<K: KindMarker>(mut self, operation: Operation<K>) -> Self {
        self.add(operation);
        self
    }

    /// Look up an operation.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<OperationEntry>> {
        self.entries.get(id)
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn operation_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(AsRef::as_ref).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
