//! Tests for paged list simulation
//!
//! # Test Coverage
//!
//! - Continuation links injected into every page with a successor
//! - Following links walks the pages in order and ends the flow
//! - Restart after exhaustion
//! - Error pages ending the flow
//! - Custom link fields

use fake_transport::prelude::*;
use http::Method;
use serde_json::{json, Value};

mod common;
use common::{dispatcher, json_body, request, Calls};

const LIST: &str = "WidgetsClient.NewListPager";

fn list_pager(calls: Calls) -> OperationRegistry {
    OperationRegistry::new().with(
        Operation::pager(LIST, "/subscriptions/{subscriptionId}/widgets")
            .unwrap()
            .handler(move |_| {
                calls.hit();
                let mut pager = PagerResponder::new();
                pager
                    .add_page(200, json!({"value": [{"name": "w1"}, {"name": "w2"}]}))
                    .add_page(200, json!({"value": [{"name": "w3"}]}))
                    .add_page(200, json!({"value": [{"name": "w4"}]}));
                Ok(pager)
            }),
    )
}

fn names(page: &Value) -> Vec<&str> {
    page["value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap())
        .collect()
}

/// Walk a pager from `path` until a page has no next link.
fn walk(dispatcher: &Dispatcher, path: &str, operation: &str, field: &str) -> Vec<Value> {
    let mut pages = Vec::new();
    let mut next = Some(path.to_string());
    while let Some(url) = next {
        let response = dispatcher
            .dispatch(request(Method::GET, &url, operation))
            .unwrap();
        assert_eq!(response.status(), 200);
        let page = json_body(&response);
        next = page.get(field).and_then(Value::as_str).map(str::to_string);
        pages.push(page);
    }
    pages
}

#[test]
fn test_pager_walks_all_pages() {
    let calls = Calls::default();
    let dispatcher = dispatcher(list_pager(calls.clone()));

    let pages = walk(&dispatcher, "/subscriptions/s1/widgets?api-version=1", LIST, "nextLink");

    assert_eq!(pages.len(), 3);
    assert_eq!(
        pages[0]["nextLink"],
        "https://fake.local/subscriptions/s1/widgets/page_2"
    );
    assert_eq!(
        pages[1]["nextLink"],
        "https://fake.local/subscriptions/s1/widgets/page_3"
    );
    assert!(pages[2].get("nextLink").is_none());
    assert_eq!(names(&pages[0]), vec!["w1", "w2"]);
    assert_eq!(names(&pages[2]), vec!["w4"]);
    assert_eq!(calls.count(), 1);
    assert_eq!(dispatcher.tracked_flows(), 0);
}

#[test]
fn test_pager_restarts_after_exhaustion() {
    let calls = Calls::default();
    let dispatcher = dispatcher(list_pager(calls.clone()));

    walk(&dispatcher, "/subscriptions/s1/widgets", LIST, "nextLink");
    let again = walk(&dispatcher, "/subscriptions/s1/widgets", LIST, "nextLink");

    assert_eq!(again.len(), 3);
    assert_eq!(names(&again[0]), vec!["w1", "w2"]);
    assert_eq!(calls.count(), 2);
}

#[test]
fn test_partial_walk_stays_tracked() {
    let dispatcher = dispatcher(list_pager(Calls::default()));

    let first = dispatcher
        .dispatch(request(Method::GET, "/subscriptions/s1/widgets", LIST))
        .unwrap();
    assert!(json_body(&first).get("nextLink").is_some());
    assert!(dispatcher.is_tracking(LIST, "/subscriptions/s1/widgets"));
    assert!(dispatcher.is_tracking(LIST, "/subscriptions/s1/widgets/page_2"));
}

#[test]
fn test_error_page_ends_flow() {
    let dispatcher = dispatcher(
        OperationRegistry::new().with(
            Operation::pager(LIST, "/widgets")
                .unwrap()
                .handler(|_| {
                    let mut pager = PagerResponder::new();
                    pager
                        .add_page(200, json!({"value": [1]}))
                        .add_error(ErrorResponder::new(503, "ServiceUnavailable"))
                        .add_page(200, json!({"value": [2]}));
                    Ok(pager)
                }),
        ),
    );

    let first = dispatcher
        .dispatch(request(Method::GET, "/widgets", LIST))
        .unwrap();
    let next = json_body(&first)["nextLink"].as_str().unwrap().to_string();

    let err = dispatcher
        .dispatch(request(Method::GET, &next, LIST))
        .unwrap_err();
    assert_eq!(err.as_simulated().map(|f| f.status), Some(503));
    assert_eq!(dispatcher.tracked_flows(), 0);
}

#[test]
fn test_page_status_outside_contract_drops_flow() {
    let dispatcher = dispatcher(
        OperationRegistry::new().with(
            Operation::pager(LIST, "/widgets")
                .unwrap()
                .handler(|_| {
                    let mut pager = PagerResponder::new();
                    pager
                        .add_page(200, json!({"value": []}))
                        .add_page(206, json!({"value": []}));
                    Ok(pager)
                }),
        ),
    );

    dispatcher
        .dispatch(request(Method::GET, "/widgets", LIST))
        .unwrap();
    let err = dispatcher
        .dispatch(request(Method::GET, "/widgets/page_2", LIST))
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::UnexpectedStatusCode { status: 206, .. }
    ));
    assert_eq!(dispatcher.tracked_flows(), 0);
}

#[test]
fn test_custom_next_link_field() {
    let dispatcher = dispatcher(
        OperationRegistry::new().with(
            Operation::pager("GraphClient.ListUsers", "/users")
                .unwrap()
                .next_link(NextLinkInjector::field("@odata.nextLink"))
                .handler(|_| {
                    let mut pager = PagerResponder::new();
                    pager
                        .add_page(200, json!({"value": [{"name": "ada"}]}))
                        .add_page(200, json!({"value": [{"name": "grace"}]}));
                    Ok(pager)
                }),
        ),
    );

    let pages = walk(&dispatcher, "/users", "GraphClient.ListUsers", "@odata.nextLink");
    assert_eq!(pages.len(), 2);
    assert!(pages[0].get("nextLink").is_none());
    assert_eq!(names(&pages[1]), vec!["grace"]);
}

#[test]
fn test_empty_pager_is_invalid() {
    let dispatcher = dispatcher(
        OperationRegistry::new().with(
            Operation::pager(LIST, "/widgets")
                .unwrap()
                .handler(|_| Ok(PagerResponder::new())),
        ),
    );

    let err = dispatcher
        .dispatch(request(Method::GET, "/widgets", LIST))
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidResponder { .. }));
}
