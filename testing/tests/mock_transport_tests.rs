//! Behaviour of the scripted mock transport as seen through the transport contract.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use courier_core::transport::cancel_pair;
use courier_core::{Method, OutboundRequest, StatusCode, Transport, Url};
use courier_testing::{MockTransport, ScriptedResponse};

fn post(body: &'static str) -> OutboundRequest {
    OutboundRequest::assemble(
        Method::POST,
        Url::parse("https://mock.test/items").unwrap(),
        Some(body.into()),
    )
}

#[tokio::test]
async fn records_requests_in_order() {
    let transport = MockTransport::new();
    let (_handle, signal) = cancel_pair();

    transport.perform(post("first"), signal.clone()).await;
    transport.perform(post("second"), signal).await;

    let bodies: Vec<_> = transport
        .requests()
        .into_iter()
        .map(|request| request.body.unwrap())
        .collect();
    assert_eq!(bodies, vec!["first", "second"]);
}

#[tokio::test]
async fn json_reply_carries_headers_and_payload() {
    let transport = MockTransport::with_responses([ScriptedResponse::json(
        &serde_json::json!({ "id": 42 }),
    )
    .with_header("date", "Wed, 01 Jan 2025 00:00:10 GMT")]);
    let (_handle, signal) = cancel_pair();

    let outcome = transport.perform(post("{}"), signal).await;
    let response = outcome.response.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert!(response.server_time().is_some());
    assert_eq!(outcome.payload.unwrap(), r#"{"id":42}"#);
}

#[tokio::test]
async fn delayed_reply_is_cut_short_by_cancellation() {
    let transport = Arc::new(MockTransport::with_responses([
        ScriptedResponse::ok().with_delay(Duration::from_secs(30)),
    ]));
    let (handle, signal) = cancel_pair();

    let call = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move { transport.perform(post("{}"), signal).await }
    });
    handle.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.response.is_none());
    assert!(outcome.error.unwrap().is_transport());
    assert_eq!(transport.cancellations(), 1);
}

#[tokio::test]
async fn empty_reply_reports_nothing() {
    let transport = MockTransport::with_responses([ScriptedResponse::Empty]);
    transport.push(ScriptedResponse::status(StatusCode::NOT_FOUND));
    let (_handle, signal) = cancel_pair();

    let empty = transport.perform(post("{}"), signal.clone()).await;
    assert!(empty.request.is_some());
    assert!(empty.response.is_none());
    assert!(empty.error.is_none());

    let missing = transport.perform(post("{}"), signal).await;
    assert_eq!(missing.response.unwrap().status, StatusCode::NOT_FOUND);
}
