//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use fake_transport::prelude::*;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const BASE_URL: &str = "https://fake.local";

/// Install the test log subscriber and return a config that ignores the
/// environment.
pub fn setup() -> RuntimeConfig {
    fake_transport::logging::init_test_logging();
    RuntimeConfig::default()
}

/// Build a dispatcher over `registry` with test configuration.
pub fn dispatcher(registry: OperationRegistry) -> Dispatcher {
    Dispatcher::builder(registry).config(setup()).build()
}

/// Request against the fake host, tagged with `operation`.
pub fn request(method: http::Method, path: &str, operation: &str) -> http::Request<Vec<u8>> {
    request_with_body(method, path, operation, Vec::new())
}

pub fn request_with_body(
    method: http::Method,
    path: &str,
    operation: &str,
    body: Vec<u8>,
) -> http::Request<Vec<u8>> {
    let uri = if path.starts_with("http") {
        path.to_string()
    } else {
        format!("{BASE_URL}{path}")
    };
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap()
        .with_operation(operation)
}

pub fn json_body(response: &http::Response<Vec<u8>>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

pub fn header<'a>(response: &'a http::Response<Vec<u8>>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Shared invocation counter for handlers.
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
