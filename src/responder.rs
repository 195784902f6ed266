//! # Responder Module
//!
//! Test-declared bundles of status code + payload (or error) that handlers
//! return to the simulator.
//!
//! - [`Responder`] answers a single-shot operation and is the terminal
//!   success of a poller or one page of a pager.
//! - [`ErrorResponder`] asks the simulator to fail the call with a simulated
//!   backend error.
//! - [`PollerResponder`] scripts the steps of a long-running operation.
//! - [`PagerResponder`] scripts the pages of a list operation.
//!
//! ```rust
//! use fake_transport::responder::{ErrorResponder, PagerResponder, PollerResponder, Responder};
//! use serde_json::json;
//!
//! let mut poller = PollerResponder::new();
//! poller.add_non_terminal_response(201);
//! poller.add_non_terminal_response(202);
//! poller.set_terminal_response(Responder::json(200, json!({"name": "w1"})));
//!
//! let mut pager = PagerResponder::new();
//! pager.add_page(200, json!({"value": [1, 2]}));
//! pager.add_error(ErrorResponder::new(503, "ServerBusy"));
//! ```

use crate::error::SimulatedFailure;
use crate::synth::NextLinkInjector;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;

/// Maximum inline headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 8;

/// Stack-allocated declared response headers.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Declared encoding of a response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body
    Empty,
    /// Structured JSON body (`application/json`)
    Json(Value),
    /// Raw binary body (`application/octet-stream`)
    Binary(Vec<u8>),
    /// Plain text body (`text/plain; charset=utf-8`)
    Text(String),
}

/// A successful response declared by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Responder {
    /// HTTP status code
    pub status: u16,
    /// Headers set verbatim on the synthesized response
    pub headers: HeaderVec,
    /// Payload
    pub body: ResponseBody,
}

impl Responder {
    /// Responder with the given status and body and no headers.
    #[must_use]
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body,
        }
    }

    /// JSON responder.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self::new(status, ResponseBody::Json(body))
    }

    /// Raw binary responder.
    #[must_use]
    pub fn binary(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, ResponseBody::Binary(body.into()))
    }

    /// Plain text responder.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, ResponseBody::Text(body.into()))
    }

    /// Responder without a body.
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self::new(status, ResponseBody::Empty)
    }

    /// Add a header, replacing any existing value (case-insensitive).
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value.into());
        self
    }

    /// Add or update a header.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Get a header by name (case-insensitive).
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A simulated failure declared by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponder {
    /// HTTP status of the error response
    pub status: u16,
    /// Service error code
    pub error_code: String,
    /// Optional structured error body
    pub body: Option<Value>,
}

impl ErrorResponder {
    /// Error with a status and service error code; the body is synthesized.
    #[must_use]
    pub fn new(status: u16, error_code: impl Into<String>) -> Self {
        Self {
            status,
            error_code: error_code.into(),
            body: None,
        }
    }

    /// Replace the synthesized error body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// The failure as carried by [`crate::error::DispatchError::SimulatedBackend`].
    #[must_use]
    pub fn into_failure(self) -> SimulatedFailure {
        SimulatedFailure {
            status: self.status,
            error_code: self.error_code,
            body: self.body,
        }
    }
}

/// Lifecycle phase of a simulated long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// More polls are expected
    InProgress,
    /// Terminal success
    Succeeded,
    /// Terminal failure
    Failed,
    /// Terminal cancellation
    Canceled,
}

impl PollPhase {
    /// Whether the phase ends the flow.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, PollPhase::InProgress)
    }
}

/// One scripted step of a poller.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// In-progress response with the given status
    InProgress(u16),
    /// Transient error while in progress; polling continues afterwards
    TransientError(ErrorResponder),
    /// Terminal success
    Succeeded(Responder),
    /// Terminal failure
    Failed(ErrorResponder),
    /// Terminal cancellation with the given status
    Canceled(u16),
}

impl PollStep {
    /// Phase the flow is in after this step.
    #[must_use]
    pub fn phase(&self) -> PollPhase {
        match self {
            PollStep::InProgress(_) | PollStep::TransientError(_) => PollPhase::InProgress,
            PollStep::Succeeded(_) => PollPhase::Succeeded,
            PollStep::Failed(_) => PollPhase::Failed,
            PollStep::Canceled(_) => PollPhase::Canceled,
        }
    }
}

/// Scripted responses of a long-running operation.
///
/// Non-terminal steps are replayed in insertion order, then the terminal
/// step ends the flow. The first dispatch answers with the first step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollerResponder {
    non_terminal: VecDeque<PollStep>,
    terminal: Option<PollStep>,
}

impl PollerResponder {
    /// Empty script; a terminal step must be set before it is returned to
    /// the simulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an in-progress response.
    pub fn add_non_terminal_response(&mut self, status: u16) -> &mut Self {
        self.non_terminal.push_back(PollStep::InProgress(status));
        self
    }

    /// Append a transient error; the poller stays in progress.
    pub fn add_non_terminal_error(&mut self, error: ErrorResponder) -> &mut Self {
        self.non_terminal.push_back(PollStep::TransientError(error));
        self
    }

    /// Terminal success.
    pub fn set_terminal_response(&mut self, responder: Responder) -> &mut Self {
        self.terminal = Some(PollStep::Succeeded(responder));
        self
    }

    /// Terminal failure.
    pub fn set_terminal_error(&mut self, error: ErrorResponder) -> &mut Self {
        self.terminal = Some(PollStep::Failed(error));
        self
    }

    /// Terminal cancellation.
    pub fn set_terminal_canceled(&mut self, status: u16) -> &mut Self {
        self.terminal = Some(PollStep::Canceled(status));
        self
    }

    /// Whether a terminal step has been set.
    #[must_use]
    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Whether any step remains.
    #[must_use]
    pub fn more(&self) -> bool {
        !self.non_terminal.is_empty() || self.terminal.is_some()
    }

    /// Number of remaining non-terminal steps.
    #[must_use]
    pub fn pending_steps(&self) -> usize {
        self.non_terminal.len()
    }

    /// Pop the next step.
    pub fn next_step(&mut self) -> Option<PollStep> {
        self.non_terminal
            .pop_front()
            .or_else(|| self.terminal.take())
    }
}

/// One scripted entry of a pager.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEntry {
    /// A page of results
    Page(Responder),
    /// A failed page fetch; ends the flow
    Error(ErrorResponder),
}

/// Scripted pages of a list operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagerResponder {
    pages: VecDeque<PageEntry>,
}

impl PagerResponder {
    /// Empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a JSON page.
    pub fn add_page(&mut self, status: u16, page: Value) -> &mut Self {
        self.pages.push_back(PageEntry::Page(Responder::json(status, page)));
        self
    }

    /// Append a page with full control over headers and body.
    pub fn add_page_responder(&mut self, responder: Responder) -> &mut Self {
        self.pages.push_back(PageEntry::Page(responder));
        self
    }

    /// Append a failed page fetch.
    pub fn add_error(&mut self, error: ErrorResponder) -> &mut Self {
        self.pages.push_back(PageEntry::Error(error));
        self
    }

    /// Whether any entry remains.
    #[must_use]
    pub fn more(&self) -> bool {
        !self.pages.is_empty()
    }

    /// Number of remaining entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether no entry remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Pop the next entry.
    pub fn next_entry(&mut self) -> Option<PageEntry> {
        self.pages.pop_front()
    }

    /// Write a continuation link into every JSON page that has a successor.
    ///
    /// `link_for(n)` returns the link that fetches entry `n` (1-based); the
    /// entry at index `i` gets the link to entry `i + 2`.
    pub fn inject_next_links(
        &mut self,
        injector: &NextLinkInjector,
        link_for: impl Fn(usize) -> String,
    ) {
        let count = self.pages.len();
        for (index, entry) in self.pages.iter_mut().enumerate() {
            if index + 1 >= count {
                break;
            }
            if let PageEntry::Page(Responder {
                body: ResponseBody::Json(page),
                ..
            }) = entry
            {
                injector.inject(page, &link_for(index + 2));
            }
        }
    }
}
