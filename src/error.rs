//! # Error Module
//!
//! Errors produced while simulating a round trip.
//!
//! Only [`DispatchError::SimulatedBackend`] is a "normal" outcome: the test's
//! handler asked for a failure and the client under test should see it
//! through its own error path. Every other variant is a defect in the test
//! harness (missing wiring, a handler violating its own status contract, a
//! hung handler that outlived the caller's deadline) and must fail fast.

use http::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Header carrying the service error code on simulated error responses.
pub const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// Why a cancellable dispatch stopped waiting for its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller fired its [`crate::task::CancelToken`].
    Canceled,
    /// The token's deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Canceled => write!(f, "context canceled"),
            CancelReason::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// A failure the test's handler asked the simulator to return.
///
/// Carries everything needed to build the wire error response: status,
/// service error code and an optional structured body.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedFailure {
    /// HTTP status of the simulated error response
    pub status: u16,
    /// Service error code (sent in [`ERROR_CODE_HEADER`] and the body)
    pub error_code: String,
    /// Structured error body; a default `{"error": {"code", "message"}}` is
    /// synthesized when absent
    pub body: Option<Value>,
}

impl SimulatedFailure {
    /// JSON body sent on the wire for this failure.
    #[must_use]
    pub fn body_json(&self) -> Value {
        match &self.body {
            Some(body) => body.clone(),
            None => serde_json::json!({
                "error": {
                    "code": self.error_code,
                    "message": format!("simulated failure {}", self.error_code),
                }
            }),
        }
    }

    /// Build the HTTP error response the client under test should observe.
    ///
    /// Falls back to `500` if the declared status is not a valid HTTP status.
    #[must_use]
    pub fn into_response(&self) -> http::Response<Vec<u8>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_vec(&self.body_json()).unwrap_or_default();
        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        if let Ok(code) = http::HeaderValue::from_str(&self.error_code) {
            headers.insert(ERROR_CODE_HEADER, code);
        }
        response
    }
}

/// Errors returned by [`crate::dispatcher::Dispatcher::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The request carried no [`crate::request::OperationId`] extension.
    MissingOperationContext,
    /// The request does not fit the operation it claims to be.
    MalformedRequest {
        /// Operation the request was dispatched to
        operation: Arc<str>,
        /// Offending request path
        path: String,
        /// What did not match or decode
        reason: String,
    },
    /// No handler is available for the operation.
    NotImplemented {
        /// Operation that was exercised
        operation: Arc<str>,
        /// Unknown operation, unknown client or unset handler
        reason: String,
    },
    /// The handler produced a status outside the operation's declared set.
    UnexpectedStatusCode {
        /// Operation whose contract was violated
        operation: Arc<str>,
        /// Status the handler produced
        status: u16,
        /// Statuses the operation declares as success
        acceptable: Vec<u16>,
    },
    /// The handler deliberately returned an error responder.
    SimulatedBackend(SimulatedFailure),
    /// The caller's cancellation or deadline won the race.
    Canceled {
        /// Operation that was in flight
        operation: Arc<str>,
        /// Cancellation or deadline
        reason: CancelReason,
    },
    /// A responder cannot produce the next response (e.g. a poller without a
    /// terminal step).
    InvalidResponder {
        /// Operation owning the responder
        operation: Arc<str>,
        /// What is wrong with it
        reason: String,
    },
    /// The handler panicked inside the dispatch task.
    HandlerPanicked {
        /// Operation whose handler panicked
        operation: Arc<str>,
        /// Panic payload rendered as text
        message: String,
    },
    /// The dispatch task could not be spawned.
    TaskSpawn {
        /// Operation being dispatched
        operation: Arc<str>,
        /// Spawn error
        reason: String,
    },
    /// The response payload could not be encoded.
    Encode {
        /// Operation being synthesized
        operation: Arc<str>,
        /// Encoder error
        reason: String,
    },
}

impl DispatchError {
    /// Whether the client under test may legitimately retry after this error.
    ///
    /// Only simulated backend failures flow through the client's own retry
    /// policy; everything else is a harness defect.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, DispatchError::SimulatedBackend(_))
    }

    /// Whether this error signals a defect in the test harness itself.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DispatchError::SimulatedBackend(_) | DispatchError::Canceled { .. }
        )
    }

    /// Operation the error refers to, when one was resolved.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        match self {
            DispatchError::MissingOperationContext | DispatchError::SimulatedBackend(_) => None,
            DispatchError::MalformedRequest { operation, .. }
            | DispatchError::NotImplemented { operation, .. }
            | DispatchError::UnexpectedStatusCode { operation, .. }
            | DispatchError::Canceled { operation, .. }
            | DispatchError::InvalidResponder { operation, .. }
            | DispatchError::HandlerPanicked { operation, .. }
            | DispatchError::TaskSpawn { operation, .. }
            | DispatchError::Encode { operation, .. } => Some(operation.as_ref()),
        }
    }

    /// The simulated failure, if this is one.
    #[must_use]
    pub fn as_simulated(&self) -> Option<&SimulatedFailure> {
        match self {
            DispatchError::SimulatedBackend(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::MissingOperationContext => write!(
                f,
                "unable to dispatch request, missing operation id in request extensions"
            ),
            DispatchError::MalformedRequest {
                operation,
                path,
                reason,
            } => write!(f, "{operation}: failed to parse path {path}: {reason}"),
            DispatchError::NotImplemented { operation, reason } => {
                write!(f, "fake for {operation} not implemented: {reason}")
            }
            DispatchError::UnexpectedStatusCode {
                operation,
                status,
                acceptable,
            } => {
                let acceptable: Vec<String> = acceptable.iter().map(u16::to_string).collect();
                write!(
                    f,
                    "{operation}: unexpected status code {status}. acceptable values are {}",
                    acceptable.join(", ")
                )
            }
            DispatchError::SimulatedBackend(failure) => write!(
                f,
                "simulated backend error: status {} code {}",
                failure.status, failure.error_code
            ),
            DispatchError::Canceled { operation, reason } => write!(f, "{operation}: {reason}"),
            DispatchError::InvalidResponder { operation, reason } => {
                write!(f, "{operation}: invalid responder: {reason}")
            }
            DispatchError::HandlerPanicked { operation, message } => {
                write!(f, "{operation}: handler panicked: {message}")
            }
            DispatchError::TaskSpawn { operation, reason } => {
                write!(f, "{operation}: failed to spawn dispatch task: {reason}")
            }
            DispatchError::Encode { operation, reason } => {
                write!(f, "{operation}: failed to encode response: {reason}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Errors raised while compiling a URL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// `{` without matching `}` or a stray `}`
    UnbalancedBrace {
        /// Template being compiled
        template: String,
        /// Byte offset of the offending brace
        position: usize,
    },
    /// `{}` placeholder
    EmptyPlaceholder {
        /// Template being compiled
        template: String,
    },
    /// The same placeholder name appears twice
    DuplicatePlaceholder {
        /// Template being compiled
        template: String,
        /// Repeated name
        name: String,
    },
    /// The generated pattern was rejected by the regex engine
    Regex {
        /// Template being compiled
        template: String,
        /// Regex compile error
        reason: String,
    },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::UnbalancedBrace { template, position } => {
                write!(f, "unbalanced brace at byte {position} in template '{template}'")
            }
            TemplateError::EmptyPlaceholder { template } => {
                write!(f, "empty placeholder in template '{template}'")
            }
            TemplateError::DuplicatePlaceholder { template, name } => {
                write!(f, "placeholder '{name}' appears twice in template '{template}'")
            }
            TemplateError::Regex { template, reason } => {
                write!(f, "template '{template}' does not compile: {reason}")
            }
        }
    }
}

impl std::error::Error for TemplateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_simulated_failures_are_retriable() {
        let simulated = DispatchError::SimulatedBackend(SimulatedFailure {
            status: 503,
            error_code: "ServerBusy".into(),
            body: None,
        });
        assert!(simulated.is_retriable());
        assert!(!simulated.is_fatal());

        let unexpected = DispatchError::UnexpectedStatusCode {
            operation: Arc::from("WidgetsClient.Get"),
            status: 201,
            acceptable: vec![200],
        };
        assert!(!unexpected.is_retriable());
        assert!(unexpected.is_fatal());
        assert_eq!(unexpected.operation(), Some("WidgetsClient.Get"));
        assert_eq!(
            unexpected.to_string(),
            "WidgetsClient.Get: unexpected status code 201. acceptable values are 200"
        );

        let canceled = DispatchError::Canceled {
            operation: Arc::from("WidgetsClient.Get"),
            reason: CancelReason::DeadlineExceeded,
        };
        assert!(!canceled.is_retriable());
        assert!(!canceled.is_fatal());
    }

    #[test]
    fn simulated_failure_response_carries_code() {
        let failure = SimulatedFailure {
            status: 404,
            error_code: "ResourceNotFound".into(),
            body: None,
        };
        let response = failure.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(ERROR_CODE_HEADER).unwrap(),
            "ResourceNotFound"
        );
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"]["code"], "ResourceNotFound");
    }
}
