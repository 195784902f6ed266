//! Tests for multi-client routing
//!
//! # Test Coverage
//!
//! - Routing by the client prefix of the operation id
//! - Lazy server construction on first use
//! - Unknown clients and untagged requests

use fake_transport::prelude::*;
use http::Method;
use serde_json::json;

mod common;
use common::{dispatcher, json_body, request, Calls};

fn named_server(name: &'static str, operation: &str) -> Dispatcher {
    dispatcher(
        OperationRegistry::new().with(
            Operation::single(operation, "/items/{id}")
                .unwrap()
                .handler(move |req| {
                    Ok(Responder::json(
                        200,
                        json!({"server": name, "id": req.path_param("id")?}),
                    ))
                }),
        ),
    )
}

#[test]
fn test_routes_by_client_prefix() {
    let mut factory = ServerFactory::new();
    factory
        .add_client("WidgetsClient", named_server("widgets", "WidgetsClient.Get"))
        .add_client("GadgetsClient", named_server("gadgets", "GadgetsClient.Get"));

    let widget = factory
        .dispatch(request(Method::GET, "/items/1", "WidgetsClient.Get"))
        .unwrap();
    let gadget = factory
        .dispatch(request(Method::GET, "/items/2", "GadgetsClient.Get"))
        .unwrap();

    assert_eq!(json_body(&widget)["server"], "widgets");
    assert_eq!(json_body(&gadget)["server"], "gadgets");
    assert_eq!(json_body(&gadget)["id"], "2");
    assert_eq!(factory.clients(), vec!["GadgetsClient", "WidgetsClient"]);
}

#[test]
fn test_lazy_server_is_built_once() {
    let inits = Calls::default();
    let counter = inits.clone();
    let mut factory = ServerFactory::new();
    factory.add_client_with("WidgetsClient", move || {
        counter.hit();
        named_server("lazy", "WidgetsClient.Get")
    });
    assert_eq!(inits.count(), 0);

    let transport: &dyn Transport = &factory;
    for id in ["1", "2", "3"] {
        let response = transport
            .send(request(Method::GET, &format!("/items/{id}"), "WidgetsClient.Get"))
            .unwrap();
        assert_eq!(json_body(&response)["server"], "lazy");
    }
    assert_eq!(inits.count(), 1);
    assert_eq!(
        factory
            .server("WidgetsClient")
            .unwrap()
            .stats()
            .get_dispatched_count(),
        3
    );
}

#[test]
fn test_unknown_client() {
    let mut factory = ServerFactory::new();
    factory.add_client("WidgetsClient", named_server("widgets", "WidgetsClient.Get"));

    let err = factory
        .dispatch(request(Method::GET, "/items/1", "GadgetsClient.Get"))
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotImplemented { ref reason, .. } if reason == "unhandled client GadgetsClient"));
}

#[test]
fn test_untagged_request() {
    let factory = ServerFactory::new();
    let untagged = http::Request::get("https://fake.local/items/1")
        .body(Vec::new())
        .unwrap();
    assert_eq!(
        factory.dispatch(untagged).unwrap_err(),
        DispatchError::MissingOperationContext
    );
}
