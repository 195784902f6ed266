//! # Response Synthesizer
//!
//! Turns responders into wire responses.
//!
//! Encoding follows the declared [`ResponseBody`] kind and sets the matching
//! `content-type`; headers declared on the responder are applied verbatim
//! afterwards and override the default. In-progress poll responses carry a
//! `location` header pointing at the synthetic poll path and a
//! `{"status": "InProgress"}` body. Continuation links of pages are written
//! by a caller-supplied [`NextLinkInjector`].

use crate::matcher::poll_link_path;
use crate::responder::{HeaderVec, Responder, ResponseBody};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use http::{StatusCode, Uri};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Response type produced by the simulator.
pub type SimResponse = http::Response<Vec<u8>>;

/// Seconds sent in `retry-after` on in-progress poll responses; clients
/// under test should not actually wait.
pub const POLL_RETRY_AFTER_SECS: &str = "0";

/// Lifecycle status strings written into poll bodies.
pub mod status {
    /// Non-terminal poll step
    pub const IN_PROGRESS: &str = "InProgress";
    /// Terminal cancellation
    pub const CANCELED: &str = "Canceled";
}

/// Build a response from a status, body and declared headers.
///
/// # Errors
///
/// Returns the reason when the status is not a valid HTTP status, when a
/// header name or value is not representable, or when the JSON body cannot
/// be serialized.
pub fn synthesize(
    status: u16,
    body: &ResponseBody,
    headers: &HeaderVec,
) -> Result<SimResponse, String> {
    let status = StatusCode::from_u16(status).map_err(|e| format!("status {status}: {e}"))?;
    let (bytes, content_type) = match body {
        ResponseBody::Empty => (Vec::new(), None),
        ResponseBody::Json(value) => (
            serde_json::to_vec(value).map_err(|e| e.to_string())?,
            Some("application/json"),
        ),
        ResponseBody::Binary(bytes) => (bytes.clone(), Some("application/octet-stream")),
        ResponseBody::Text(text) => (text.clone().into_bytes(), Some("text/plain; charset=utf-8")),
    };

    let mut response = http::Response::new(bytes);
    *response.status_mut() = status;
    let out = response.headers_mut();
    if let Some(content_type) = content_type {
        out.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("header name {name:?}: {e}"))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| format!("header {name} value: {e}"))?;
        if name == CONTENT_TYPE {
            out.insert(name, value);
        } else {
            out.append(name, value);
        }
    }
    Ok(response)
}

/// Build the response declared by `responder`.
///
/// # Errors
///
/// See [`synthesize`].
pub fn synthesize_responder(responder: &Responder) -> Result<SimResponse, String> {
    synthesize(responder.status, &responder.body, &responder.headers)
}

/// Build a non-terminal poll response for the flow tracked at `base_path`.
///
/// # Errors
///
/// See [`synthesize`].
pub fn synthesize_in_progress(
    status: u16,
    request_uri: &Uri,
    base_path: &str,
) -> Result<SimResponse, String> {
    let mut headers = HeaderVec::new();
    headers.push((
        Arc::from(LOCATION.as_str()),
        absolute_link(request_uri, &poll_link_path(base_path)),
    ));
    headers.push((Arc::from(RETRY_AFTER.as_str()), POLL_RETRY_AFTER_SECS.to_string()));
    synthesize(
        status,
        &ResponseBody::Json(json!({ "status": status::IN_PROGRESS })),
        &headers,
    )
}

/// Build the terminal response of a canceled poller.
///
/// # Errors
///
/// See [`synthesize`].
pub fn synthesize_canceled(status: u16) -> Result<SimResponse, String> {
    synthesize(
        status,
        &ResponseBody::Json(json!({ "status": status::CANCELED })),
        &HeaderVec::new(),
    )
}

/// Qualify `path` with the scheme and authority of the request, when the
/// request URI is absolute.
#[must_use]
pub fn absolute_link(request_uri: &Uri, path: &str) -> String {
    match (request_uri.scheme_str(), request_uri.authority()) {
        (Some(scheme), Some(authority)) => format!("{scheme}://{authority}{path}"),
        _ => path.to_string(),
    }
}

type InjectFn = dyn Fn(&mut Value, &str) + Send + Sync;

/// Writes a continuation link into a JSON page.
///
/// ```rust
/// use fake_transport::synth::NextLinkInjector;
/// use serde_json::json;
///
/// let injector = NextLinkInjector::field("@odata.nextLink");
/// let mut page = json!({"value": []});
/// injector.inject(&mut page, "/widgets/page_2");
/// assert_eq!(page["@odata.nextLink"], "/widgets/page_2");
/// ```
#[derive(Clone)]
pub struct NextLinkInjector {
    inject: Arc<InjectFn>,
}

impl NextLinkInjector {
    /// Injector backed by an arbitrary mutator.
    pub fn new<F>(inject: F) -> Self
    where
        F: Fn(&mut Value, &str) + Send + Sync + 'static,
    {
        Self {
            inject: Arc::new(inject),
        }
    }

    /// Injector that sets a top-level string field on object pages.
    ///
    /// Non-object pages are left unchanged.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self::new(move |page, link| {
            if let Value::Object(map) = page {
                map.insert(name.clone(), Value::String(link.to_string()));
            }
        })
    }

    /// Write `link` into `page`.
    pub fn inject(&self, page: &mut Value, link: &str) {
        (self.inject)(page, link);
    }
}

impl Default for NextLinkInjector {
    fn default() -> Self {
        Self::field("nextLink")
    }
}

impl fmt::Debug for NextLinkInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextLinkInjector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_sets_content_type() {
        let response = synthesize_responder(&Responder::json(201, json!({"id": 1}))).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["id"], 1);
    }

    #[test]
    fn declared_content_type_wins() {
        let responder =
            Responder::text(200, "a,b").with_header("Content-Type", "text/csv");
        let response = synthesize_responder(&responder).unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "text/csv");
        assert_eq!(response.body(), b"a,b");
    }

    #[test]
    fn empty_body_has_no_content_type() {
        let response = synthesize_responder(&Responder::empty(204)).unwrap();
        assert!(response.body().is_empty());
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn invalid_status_is_an_error() {
        assert!(synthesize_responder(&Responder::empty(42)).is_err());
    }

    #[test]
    fn in_progress_points_at_poll_path() {
        let uri: Uri = "https://fake.local/widgets/w1?api-version=1".parse().unwrap();
        let response = synthesize_in_progress(202, &uri, "/widgets/w1").unwrap();
        assert_eq!(
            response.headers()[LOCATION],
            "https://fake.local/widgets/w1/get/fake/status"
        );
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "InProgress");
    }

    #[test]
    fn relative_uri_keeps_relative_link() {
        let uri: Uri = "/widgets".parse().unwrap();
        assert_eq!(absolute_link(&uri, "/widgets/page_2"), "/widgets/page_2");
    }

    #[test]
    fn field_injector_ignores_non_objects() {
        let injector = NextLinkInjector::default();
        let mut page = json!([1, 2]);
        injector.inject(&mut page, "/next");
        assert_eq!(page, json!([1, 2]));
    }
}
