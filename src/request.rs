//! # Request Module
//!
//! Inbound request context and the helpers handlers use to read it.
//!
//! Requests enter the simulator as `http::Request<Vec<u8>>`. The operation
//! being exercised travels as an [`OperationId`] in the request extensions,
//! set by the client under test (or by the test itself) through
//! [`RequestExt::with_operation`]. An optional [`CancelToken`] in the same
//! extensions bounds how long the caller waits.
//!
//! Handlers receive an [`OperationRequest`]: the parsed request with path
//! parameters already extracted from the operation's URL template.
//!
//! ```rust
//! use fake_transport::request::{OperationId, RequestExt};
//!
//! let request = http::Request::get("https://fake.local/widgets/w1")
//!     .body(Vec::<u8>::new())
//!     .unwrap()
//!     .with_operation("WidgetsClient.Get");
//! assert_eq!(request.operation_id().map(OperationId::client), Some("WidgetsClient"));
//! ```

use crate::error::DispatchError;
use crate::ids::DispatchId;
use crate::matcher::{sanitize_tracked_path, ParamVec, PathTemplate};
use crate::task::CancelToken;
use http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifier of an operation, e.g. `"WidgetsClient.BeginCreate"`.
///
/// The part before the first `.` names the client; [`crate::factory::ServerFactory`]
/// routes on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationId(Arc<str>);

impl OperationId {
    /// Wrap an operation id.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The full id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shared handle to the id.
    #[must_use]
    pub fn as_arc(&self) -> &Arc<str> {
        &self.0
    }

    /// Client part of the id (everything before the first `.`).
    #[must_use]
    pub fn client(&self) -> &str {
        self.0.split_once('.').map_or(&self.0, |(client, _)| client)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Attach and read the simulator's request extensions.
pub trait RequestExt {
    /// Tag the request with the operation it exercises.
    #[must_use]
    fn with_operation(self, operation: impl Into<OperationId>) -> Self;

    /// Bound the dispatch of this request by `token`.
    #[must_use]
    fn with_cancel(self, token: CancelToken) -> Self;

    /// The operation the request is tagged with.
    fn operation_id(&self) -> Option<&OperationId>;

    /// The cancellation token attached to the request.
    fn cancel_token(&self) -> Option<&CancelToken>;
}

impl<B> RequestExt for http::Request<B> {
    fn with_operation(mut self, operation: impl Into<OperationId>) -> Self {
        self.extensions_mut().insert(operation.into());
        self
    }

    fn with_cancel(mut self, token: CancelToken) -> Self {
        self.extensions_mut().insert(token);
        self
    }

    fn operation_id(&self) -> Option<&OperationId> {
        self.extensions().get::<OperationId>()
    }

    fn cancel_token(&self) -> Option<&CancelToken> {
        self.extensions().get::<CancelToken>()
    }
}

/// Request as seen by an operation handler.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Unique id of this dispatch (from `x-request-id` when it holds a ULID)
    pub dispatch_id: DispatchId,
    /// Operation being exercised
    pub operation: OperationId,
    /// HTTP method
    pub method: Method,
    /// Full request URI
    pub uri: Uri,
    /// Percent-decoded path parameters in template order
    pub path_params: ParamVec,
    /// Decoded query pairs in request order
    pub query_params: ParamVec,
    /// Request headers
    pub headers: HeaderMap,
    /// Raw request body
    pub body: Vec<u8>,
    /// Cancellation signal of the caller; long-running handlers may poll it
    pub cancel: CancelToken,
}

impl OperationRequest {
    /// Parse `request` against the operation's URL template.
    ///
    /// The request path is matched as sent.
    ///
    /// # Errors
    ///
    /// [`DispatchError::MalformedRequest`] when the path does not match the
    /// template or a parameter does not decode.
    pub fn parse(
        dispatch_id: DispatchId,
        operation: OperationId,
        template: &PathTemplate,
        request: &http::Request<Vec<u8>>,
        cancel: CancelToken,
    ) -> Result<Self, DispatchError> {
        let path = request.uri().path();
        Self::parse_at(dispatch_id, operation, template, path, request, cancel)
    }

    /// Parse a call of a poller or pager flow.
    ///
    /// Poll and page suffixes are stripped from the path before matching, so
    /// follow-up calls of a tracked flow resolve to the same parameters.
    ///
    /// # Errors
    ///
    /// As [`OperationRequest::parse`].
    pub fn parse_tracked(
        dispatch_id: DispatchId,
        operation: OperationId,
        template: &PathTemplate,
        request: &http::Request<Vec<u8>>,
        cancel: CancelToken,
    ) -> Result<Self, DispatchError> {
        let path = sanitize_tracked_path(request.uri().path());
        Self::parse_at(dispatch_id, operation, template, path, request, cancel)
    }

    fn parse_at(
        dispatch_id: DispatchId,
        operation: OperationId,
        template: &PathTemplate,
        path: &str,
        request: &http::Request<Vec<u8>>,
        cancel: CancelToken,
    ) -> Result<Self, DispatchError> {
        let raw_path = request.uri().path();
        let path_params =
            template
                .extract(path)
                .map_err(|reason| DispatchError::MalformedRequest {
                    operation: Arc::clone(operation.as_arc()),
                    path: raw_path.to_string(),
                    reason,
                })?;

        let query_params: ParamVec = request
            .uri()
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (Arc::<str>::from(k.as_ref()), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            dispatch_id,
            operation,
            method: request.method().clone(),
            uri: request.uri().clone(),
            path_params,
            query_params,
            headers: request.headers().clone(),
            body: request.body().clone(),
            cancel,
        })
    }

    fn malformed(&self, reason: String) -> DispatchError {
        DispatchError::MalformedRequest {
            operation: Arc::clone(self.operation.as_arc()),
            path: self.uri.path().to_string(),
            reason,
        }
    }

    /// Request path without query.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// A required path parameter.
    ///
    /// # Errors
    ///
    /// [`DispatchError::MalformedRequest`] when the template has no such
    /// parameter.
    pub fn path_param(&self, name: &str) -> Result<&str, DispatchError> {
        self.path_params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| self.malformed(format!("missing path parameter {name}")))
    }

    /// An optional query parameter; the last occurrence wins.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rev()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// An optional query parameter parsed as `T`.
    ///
    /// Absent and empty values yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::MalformedRequest`] when the value does not parse.
    pub fn query_as<T>(&self, name: &str) -> Result<Option<T>, DispatchError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.query_param(name) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| self.malformed(format!("query parameter {name}={raw}: {e}"))),
        }
    }

    /// A delimited query parameter split into its parts.
    ///
    /// Absent or empty values yield an empty list.
    #[must_use]
    pub fn query_split(&self, name: &str, separator: char) -> Vec<&str> {
        match self.query_param(name) {
            None | Some("") => Vec::new(),
            Some(raw) => raw.split(separator).collect(),
        }
    }

    /// A header value as text, when present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// [`DispatchError::MalformedRequest`] when the body is not valid JSON
    /// for `T`.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        serde_json::from_slice(&self.body).map_err(|e| self.malformed(format!("request body: {e}")))
    }

    /// The raw body bytes.
    #[must_use]
    pub fn raw_body(&self) -> &[u8] {
        &self.body
    }

    /// Convert into a typed request.
    ///
    /// ```rust,ignore
    /// struct GetWidget { name: String }
    ///
    /// impl TryFrom<&OperationRequest> for GetWidget {
    ///     type Error = anyhow::Error;
    ///     fn try_from(req: &OperationRequest) -> anyhow::Result<Self> {
    ///         Ok(Self { name: req.path_param("widgetName")?.to_string() })
    ///     }
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// [`DispatchError::MalformedRequest`] carrying the conversion error.
    pub fn extract<T>(&self) -> Result<T, DispatchError>
    where
        T: for<'a> TryFrom<&'a OperationRequest, Error = anyhow::Error>,
    {
        T::try_from(self).map_err(|e| self.malformed(format!("{e:#}")))
    }
}
