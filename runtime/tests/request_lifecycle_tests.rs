//! Integration tests for the request lifecycle
//!
//! Drives real requests on their store tasks against the scripted mock
//! transport: dispatch, configuration gating, hook ordering, completion
//! fan-out, cancellation, retries and dropped handles.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_core::codec::{no_body, no_result};
use courier_core::{
    Bytes, CallError, Method, OutboundRequest, ResponseMetadata, StatusCode, Transport, Url,
};
use courier_runtime::{Request, RetryPolicy, SerialQueue, process, retry, validate};
use courier_testing::{MockTransport, ScriptedResponse, init_test_tracing};
use tokio::sync::oneshot;

// ============================================================================
// Test Fixtures
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn request(transport: &Arc<MockTransport>) -> Request<(), ()> {
    init_test_tracing();
    Request::new(
        Method::POST,
        Url::parse("https://api.example.com/items").unwrap(),
        (),
        no_body,
        no_result,
        Arc::clone(transport) as Arc<dyn Transport>,
    )
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn reply(status: StatusCode, payload: Option<&'static str>) -> ScriptedResponse {
    ScriptedResponse::Reply {
        response: ResponseMetadata::new(status),
        payload: payload.map(Bytes::from),
        delay: None,
    }
}

// ============================================================================
// Dispatch and configuration
// ============================================================================

#[tokio::test]
async fn calling_twice_dispatches_once() {
    let transport = Arc::new(MockTransport::new());
    let request = request(&transport);

    request.call();
    request.call();
    let outcome = request.wait().await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(transport.call_count(), 1);
    assert!(request.is_called());
    assert!(request.is_completed());
}

#[tokio::test]
async fn configuration_after_call_is_ignored() {
    let transport = Arc::new(MockTransport::with_responses([
        ScriptedResponse::failure("reset"),
    ]));
    let interceptions = Arc::new(AtomicUsize::new(0));

    let request = request(&transport)
        .process(process::header("x-before", "1"))
        .call();

    let counter = Arc::clone(&interceptions);
    let _ = request
        .process(process::header("x-after", "1"))
        .retry(retry::on_any_error(5))
        .before_calling(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let outcome = request.wait().await.unwrap();

    let sent = outcome.request().unwrap();
    assert_eq!(sent.header("x-before"), Some("1"));
    assert_eq!(sent.header("x-after"), None);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(request.retry_count(), 0);
    assert_eq!(interceptions.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.error(), Some(&CallError::transport("reset")));
}

#[tokio::test]
async fn assembled_request_carries_charset_and_body() {
    let transport = Arc::new(MockTransport::new());
    let request: Request<String, ()> = Request::new(
        Method::PUT,
        Url::parse("https://api.example.com/notes/1").unwrap(),
        "hello".to_string(),
        |text: &String| Ok(Some(Bytes::from(text.clone()))),
        no_result,
        Arc::clone(&transport) as Arc<dyn Transport>,
    );

    request.call().wait().await.unwrap();

    let requests = transport.requests();
    let sent = &requests[0];
    assert_eq!(sent.method, Method::PUT);
    assert_eq!(sent.header("content-type"), Some("charset=utf-8"));
    assert_eq!(sent.body.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn processors_run_by_descending_priority() {
    use courier_core::Priority;

    let transport = Arc::new(MockTransport::new());
    let order = log();

    let mut request = request(&transport);
    for (label, priority) in [
        ("low", Priority::Low),
        ("very-high", Priority::VeryHigh),
        ("normal-1", Priority::Normal),
        ("very-low", Priority::VeryLow),
        ("normal-2", Priority::Normal),
        ("high", Priority::High),
    ] {
        let order = Arc::clone(&order);
        request = request.process_with_priority(priority, move |_: &mut OutboundRequest| {
            push(&order, label);
            Ok(())
        });
    }

    request.call().wait().await.unwrap();

    assert_eq!(
        entries(&order),
        vec!["very-high", "high", "normal-1", "normal-2", "low", "very-low"]
    );
}

#[tokio::test]
async fn processor_failure_skips_the_transport() {
    let transport = Arc::new(MockTransport::new());

    let outcome = request(&transport)
        .process(process::header("bad header", "x"))
        .call()
        .wait()
        .await
        .unwrap();

    assert!(matches!(
        outcome.error(),
        Some(CallError::ProcessorFailure(_))
    ));
    assert!(outcome.request().is_none());
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn serializer_failure_skips_the_transport() {
    let transport = Arc::new(MockTransport::new());
    let request: Request<u8, ()> = Request::new(
        Method::POST,
        Url::parse("https://api.example.com/items").unwrap(),
        9,
        |_: &u8| Err(CallError::serialize("unsupported")),
        no_result,
        Arc::clone(&transport) as Arc<dyn Transport>,
    );

    let outcome = request.call().wait().await.unwrap();

    assert_eq!(
        outcome.error(),
        Some(&CallError::SerializeFailure("unsupported".into()))
    );
    assert_eq!(transport.call_count(), 0);
}

// ============================================================================
// Interceptors and completion fan-out
// ============================================================================

#[tokio::test]
async fn interceptors_fire_once_around_dispatch() {
    let transport = Arc::new(MockTransport::with_responses([ScriptedResponse::failure(
        "reset",
    )]));
    let events = log();

    let before = Arc::clone(&events);
    let after = Arc::clone(&events);
    let done = Arc::clone(&events);
    let request = request(&transport)
        .retry(retry::on_transport_failure(1))
        .before_calling(move |request| {
            push(&before, format!("before called={}", request.is_called()));
        })
        .after_calling(move |request| {
            push(&after, format!("after completed={}", request.is_completed()));
        })
        .response(move |_| push(&done, "done"));

    request.call().wait().await.unwrap();

    // The retry re-dispatches without re-running interceptors.
    assert_eq!(transport.call_count(), 2);
    assert_eq!(
        entries(&events),
        vec!["before called=true", "after completed=false", "done"]
    );
}

#[tokio::test]
async fn completion_handlers_run_once_in_registration_order() {
    let transport = Arc::new(MockTransport::new());
    let events = log();

    let mut request = request(&transport);
    for label in ["early-1", "early-2"] {
        let events = Arc::clone(&events);
        request = request.response(move |_| push(&events, label));
    }
    request.call().wait().await.unwrap();

    for label in ["late-1", "late-2"] {
        let events = Arc::clone(&events);
        let _ = request.response(move |_| push(&events, label));
    }

    eventually(|| entries(&events).len() == 4).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        entries(&events),
        vec!["early-1", "early-2", "late-1", "late-2"]
    );
}

#[tokio::test]
async fn success_and_failure_handlers_split_on_error() {
    let transport = Arc::new(MockTransport::with_responses([reply(
        StatusCode::OK,
        Some("42"),
    )]));
    let events = log();

    let request: Request<u32, u32> = Request::new(
        Method::GET,
        Url::parse("https://api.example.com/answer").unwrap(),
        7,
        no_body,
        |_: &u32, _: &OutboundRequest, _: &ResponseMetadata, payload: Option<&Bytes>| {
            let text = std::str::from_utf8(payload.ok_or_else(|| CallError::deserialize("empty"))?)
                .map_err(CallError::deserialize)?;
            text.parse::<u32>().map_err(CallError::deserialize)
        },
        Arc::clone(&transport) as Arc<dyn Transport>,
    );

    let success = Arc::clone(&events);
    let with = Arc::clone(&events);
    let detailed = Arc::clone(&events);
    let failure = Arc::clone(&events);
    let any = Arc::clone(&events);
    let request = request
        .on_success(move |result| push(&success, format!("success {result}")))
        .on_success_with(move |parameters, result| {
            push(&with, format!("with {parameters} {result}"));
        })
        .on_success_detailed(move |_, sent, response, payload, result| {
            push(
                &detailed,
                format!(
                    "detailed {} {} {} {result}",
                    sent.method,
                    response.status.as_u16(),
                    payload.map_or(0, Bytes::len)
                ),
            );
        })
        .on_failure(move |error| push(&failure, format!("failure {error}")))
        .response_result(move |result, error| {
            push(&any, format!("result {:?} {}", result, error.is_some()));
        });

    request.call().wait().await.unwrap();

    assert_eq!(
        entries(&events),
        vec![
            "success 42",
            "with 7 42",
            "detailed GET 200 2 42",
            "result Some(42) false",
        ]
    );
}

#[tokio::test]
async fn first_failing_validator_wins_and_skips_deserialization() {
    let transport = Arc::new(MockTransport::with_responses([reply(
        StatusCode::NOT_FOUND,
        Some("missing"),
    )]));
    let events = log();
    let deserialized = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&deserialized);
    let request: Request<(), ()> = Request::new(
        Method::GET,
        Url::parse("https://api.example.com/thing").unwrap(),
        (),
        no_body,
        move |_: &(), _: &OutboundRequest, _: &ResponseMetadata, _: Option<&Bytes>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Arc::clone(&transport) as Arc<dyn Transport>,
    );

    let second = Arc::clone(&events);
    let failure = Arc::clone(&events);
    let success = Arc::clone(&events);
    let outcome = request
        .validate(validate::success_status())
        .validate(move |_, _, _, _| {
            push(&second, "second validator");
            Ok(())
        })
        .on_success(move |_| push(&success, "success"))
        .on_failure_detailed(move |_, sent, response, payload, result, error| {
            push(
                &failure,
                format!(
                    "failure {} {:?} {:?} {} {error}",
                    sent.is_some(),
                    response.map(|response| response.status.as_u16()),
                    payload.map(|payload| payload.len()),
                    result.is_some()
                ),
            );
        })
        .call()
        .wait()
        .await
        .unwrap();

    assert_eq!(
        outcome.error(),
        Some(&CallError::ValidationFailure(
            "unexpected status 404 Not Found".into()
        ))
    );
    assert_eq!(deserialized.load(Ordering::SeqCst), 0);
    assert_eq!(
        entries(&events),
        vec!["failure true Some(404) Some(7) false Validation failed: unexpected status 404 Not Found"]
    );
}

#[tokio::test]
async fn missing_response_is_a_request_failure() {
    let transport = Arc::new(MockTransport::with_responses([ScriptedResponse::Empty]));

    let outcome = request(&transport).call().wait().await.unwrap();

    assert_eq!(outcome.error(), Some(&CallError::RequestFailure));
}

#[tokio::test]
async fn response_on_hops_to_the_queue() {
    let transport = Arc::new(MockTransport::new());
    let queue = SerialQueue::new("ui");
    let events = log();

    let (tx, rx) = oneshot::channel();
    let first = Arc::clone(&events);
    queue
        .submit(move || push(&first, "queued before"))
        .unwrap();

    let handled = Arc::clone(&events);
    let _ = request(&transport)
        .response_on(&queue, move |request| {
            push(&handled, format!("handler completed={}", request.is_completed()));
            let _ = tx.send(());
        })
        .call();

    tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        entries(&events),
        vec!["queued before", "handler completed=true"]
    );
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancel_without_call_in_flight_completes_immediately() {
    let transport = Arc::new(MockTransport::new());
    let request = request(&transport);

    request.cancel();
    let outcome = request.wait().await.unwrap();

    assert_eq!(outcome.error(), Some(&CallError::RequestCancelled));
    assert!(request.is_cancelled());

    request.call();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.call_count(), 0);
    assert!(!request.is_called());
}

#[tokio::test]
async fn cancel_during_preprocessing_completes_without_transport() {
    let transport = Arc::new(MockTransport::new());
    let request = request(&transport)
        .preprocess(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<(), CallError>(())
        })
        .call();

    request.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(2), request.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.error(), Some(&CallError::RequestCancelled));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn cancel_in_flight_waits_for_the_transport() {
    let transport = Arc::new(MockTransport::with_responses([ScriptedResponse::hang()]));
    let completions = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&completions);
    let request = request(&transport)
        .response(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .call();

    eventually(|| transport.call_count() == 1).await;
    request.cancel();
    request.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), request.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.error(), Some(&CallError::transport("cancelled")));
    assert_eq!(transport.cancellations(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_while_backing_off_completes_immediately() {
    let transport = Arc::new(MockTransport::with_responses([ScriptedResponse::failure(
        "reset",
    )]));
    let request = request(&transport)
        .retry(retry::on_transport_failure(3))
        .backoff(
            RetryPolicy::builder()
                .initial_delay(Duration::from_secs(30))
                .build(),
        )
        .call();

    eventually(|| request.retry_count() == 1).await;
    request.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), request.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.error(), Some(&CallError::RequestCancelled));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn dropped_uncalled_request_never_reaches_the_transport() {
    let transport = Arc::new(MockTransport::new());
    let completions = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&completions);
    let request = request(&transport).response(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    drop(request);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.call_count(), 0);
    assert_eq!(completions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dropping_every_handle_after_call_still_completes() {
    let transport = Arc::new(MockTransport::with_responses([
        ScriptedResponse::ok().with_delay(Duration::from_millis(20)),
    ]));
    let events = log();

    let before = Arc::clone(&events);
    let done = Arc::clone(&events);
    let _ = request(&transport)
        .before_calling(move |_| push(&before, "before"))
        .on_success(move |_| push(&done, "success"))
        .call();

    eventually(|| entries(&events).len() == 2).await;
    assert_eq!(entries(&events), vec!["before", "success"]);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.cancellations(), 0);
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn retry_sequence_runs_three_attempts_with_fresh_outcomes() {
    let transport = Arc::new(MockTransport::with_responses([
        reply(StatusCode::INTERNAL_SERVER_ERROR, Some("oops")),
        ScriptedResponse::failure("reset"),
        reply(StatusCode::OK, None),
    ]));
    let seen = log();
    let never = Arc::new(AtomicUsize::new(0));

    let never_counter = Arc::clone(&never);
    let observed = Arc::clone(&seen);
    let request = request(&transport)
        .retry(move |_| {
            never_counter.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        })
        .retry(move |context| {
            push(
                &observed,
                format!(
                    "attempt={} status={:?} payload={} error={}",
                    context.attempt,
                    context.response.map(|response| response.status.as_u16()),
                    context.payload.is_some(),
                    context.error.is_some()
                ),
            );
            Ok(context.attempt < 2)
        })
        .call();

    let outcome = request.wait().await.unwrap();

    assert_eq!(transport.call_count(), 3);
    assert_eq!(request.retry_count(), 2);
    assert_eq!(never.load(Ordering::SeqCst), 3);
    assert_eq!(
        entries(&seen),
        vec![
            "attempt=0 status=Some(500) payload=true error=false",
            "attempt=1 status=None payload=false error=true",
            "attempt=2 status=Some(200) payload=false error=false",
        ]
    );
    assert!(outcome.is_success());
    assert_eq!(outcome.response().unwrap().status, StatusCode::OK);
    assert!(outcome.payload().is_none());
}

#[tokio::test]
async fn failing_retry_condition_is_terminal() {
    let transport = Arc::new(MockTransport::with_responses([ScriptedResponse::failure(
        "reset",
    )]));
    let later = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&later);
    let request = request(&transport)
        .retry(|_| Err(CallError::retry_condition("budget store offline")))
        .retry(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
        .call();

    let outcome = request.wait().await.unwrap();

    assert_eq!(
        outcome.error(),
        Some(&CallError::RetryConditionFailure("budget store offline".into()))
    );
    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn no_retry_conditions_fail_fast() {
    let transport = Arc::new(MockTransport::with_responses([ScriptedResponse::failure(
        "reset",
    )]));

    let outcome = request(&transport).call().wait().await.unwrap();

    assert_eq!(outcome.error(), Some(&CallError::transport("reset")));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn preprocessing_reruns_on_every_attempt() {
    let transport = Arc::new(MockTransport::with_responses([
        ScriptedResponse::failure("reset"),
        ScriptedResponse::failure("reset"),
    ]));
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let outcome = request(&transport)
        .preprocess(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), CallError>(()) }
        })
        .retry(retry::on_transport_failure(5))
        .call()
        .wait()
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn preprocessing_failure_skips_the_transport() {
    let transport = Arc::new(MockTransport::new());

    let outcome = request(&transport)
        .preprocess(|| async { Err::<(), _>(CallError::processor("token refresh failed")) })
        .call()
        .wait()
        .await
        .unwrap();

    assert_eq!(
        outcome.error(),
        Some(&CallError::ProcessorFailure("token refresh failed".into()))
    );
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn backoff_waits_between_attempts() {
    let transport = Arc::new(MockTransport::with_responses([ScriptedResponse::failure(
        "reset",
    )]));
    let started = tokio::time::Instant::now();

    let outcome = request(&transport)
        .retry(retry::on_transport_failure(1))
        .backoff(
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(40))
                .build(),
        )
        .call()
        .wait()
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(transport.call_count(), 2);
}
