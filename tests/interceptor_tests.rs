//! Tests for the pre-dispatch interceptor hook
//!
//! # Test Coverage
//!
//! - Interceptor answers take precedence over handlers
//! - Declined requests fall through to normal dispatch
//! - Interceptor errors are returned unchanged
//! - The process-wide slot

use fake_transport::prelude::*;
use http::Method;
use serde_json::json;

mod common;
use common::{json_body, request, setup, Calls};

fn registry(calls: Calls) -> OperationRegistry {
    OperationRegistry::new().with(
        Operation::single("WidgetsClient.Get", "/widgets/{widgetName}")
            .unwrap()
            .handler(move |_| {
                calls.hit();
                Ok(Responder::json(200, json!({"source": "handler"})))
            }),
    )
}

fn intercepted_response() -> http::Response<Vec<u8>> {
    let mut response = http::Response::new(br#"{"source":"interceptor"}"#.to_vec());
    *response.status_mut() = http::StatusCode::ACCEPTED;
    response
}

#[test]
fn test_interceptor_takes_precedence() {
    let calls = Calls::default();
    let slot = InterceptorSlot::new();
    let dispatcher = Dispatcher::builder(registry(calls.clone()))
        .config(setup())
        .interceptor_slot(slot.clone())
        .build();

    slot.install_fn(|request| {
        (request.uri().path() == "/widgets/special").then(|| Ok(intercepted_response()))
    });

    let special = dispatcher
        .dispatch(request(Method::GET, "/widgets/special", "WidgetsClient.Get"))
        .unwrap();
    assert_eq!(special.status(), 202);
    assert_eq!(json_body(&special)["source"], "interceptor");
    assert_eq!(calls.count(), 0);

    let plain = dispatcher
        .dispatch(request(Method::GET, "/widgets/plain", "WidgetsClient.Get"))
        .unwrap();
    assert_eq!(json_body(&plain)["source"], "handler");
    assert_eq!(calls.count(), 1);
    assert_eq!(dispatcher.stats().get_intercepted_count(), 1);
}

#[test]
fn test_interceptor_sees_unregistered_operations() {
    let slot = InterceptorSlot::new();
    let dispatcher = Dispatcher::builder(OperationRegistry::new())
        .config(setup())
        .interceptor_slot(slot.clone())
        .build();
    slot.install_fn(|_| Some(Ok(intercepted_response())));

    let response = dispatcher
        .dispatch(request(Method::GET, "/anything", "OtherClient.Get"))
        .unwrap();
    assert_eq!(response.status(), 202);
}

#[test]
fn test_interceptor_error_is_returned_unchanged() {
    let slot = InterceptorSlot::new();
    let dispatcher = Dispatcher::builder(registry(Calls::default()))
        .config(setup())
        .interceptor_slot(slot.clone())
        .build();
    slot.install_fn(|_| {
        Some(Err(DispatchError::SimulatedBackend(
            ErrorResponder::new(429, "TooManyRequests").into_failure(),
        )))
    });

    let err = dispatcher
        .dispatch(request(Method::GET, "/widgets/w1", "WidgetsClient.Get"))
        .unwrap_err();
    assert_eq!(err.as_simulated().map(|f| f.status), Some(429));
}

#[test]
fn test_reset_restores_dispatch() {
    let calls = Calls::default();
    let slot = InterceptorSlot::new();
    let dispatcher = Dispatcher::builder(registry(calls.clone()))
        .config(setup())
        .interceptor_slot(slot.clone())
        .build();

    slot.install_fn(|_| Some(Ok(intercepted_response())));
    assert!(slot.reset());

    let response = dispatcher
        .dispatch(request(Method::GET, "/widgets/w1", "WidgetsClient.Get"))
        .unwrap();
    assert_eq!(json_body(&response)["source"], "handler");
    assert_eq!(calls.count(), 1);
}

#[test]
fn test_global_slot() {
    let calls = Calls::default();
    let dispatcher = Dispatcher::builder(registry(calls.clone()))
        .config(setup())
        .global_interceptor()
        .build();

    InterceptorSlot::global().install_fn(|request| {
        (request.uri().path() == "/widgets/global").then(|| Ok(intercepted_response()))
    });
    let response = dispatcher
        .dispatch(request(Method::GET, "/widgets/global", "WidgetsClient.Get"))
        .unwrap();
    InterceptorSlot::global().reset();

    assert_eq!(response.status(), 202);
    assert_eq!(calls.count(), 0);
    assert!(!InterceptorSlot::global().is_installed());
}
