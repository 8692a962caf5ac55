mod common;

use common::{init_test_logging, session, ImmediateResolver, Log, Transport};
use promise_gate::{Client, Error, Executor, Json, Request, SerialExecutor, StateKind};
use serde::Deserialize;
use std::sync::Arc;
use std::thread;

fn ready_client() -> (Client<ImmediateResolver>, Transport) {
    let client = Client::new(ImmediateResolver);
    client.resolve_dependency(session("t"));
    (client, Transport::default())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Item {
    id: u32,
    name: String,
}

#[test]
fn error_statuses_go_to_failure_handlers_only() {
    init_test_logging();
    let (client, transport) = ready_client();
    let responses = Log::new();
    let failures = Log::new();
    {
        let responses = responses.clone();
        let failures = failures.clone();
        client
            .submit(Request::get("/missing"), transport.send())
            .on_response(move |_, _, response| responses.push(response.status))
            .on_failure(move |error| failures.push(error));
    }

    transport.last().respond(404, "not found");
    assert!(responses.entries().is_empty());
    assert_eq!(failures.entries(), [Error::ClientStatus { status: 404 }]);
}

#[test]
fn server_errors_are_classified() {
    let (client, transport) = ready_client();
    let failures = Log::new();
    let sink = failures.clone();
    let promise = client.submit(Request::get("/boom"), transport.send());
    promise.on_failure(move |error| sink.push(error));

    transport.last().respond(503, "");
    assert_eq!(failures.entries(), [Error::ServerStatus { status: 503 }]);
    // the exchange itself completed, so the promise finished
    assert_eq!(promise.kind(), StateKind::Finished);
}

#[test]
fn excluded_statuses_are_not_failures() {
    let (client, transport) = ready_client();
    let failures = Log::new();
    let handled = Log::new();
    {
        let failures = failures.clone();
        let handled = handled.clone();
        client
            .submit(Request::get("/maybe"), transport.send())
            .on_failure_with(None, [404u16], move |error| failures.push(error))
            .on_response_with(None, |status| status == 404, move |_, _, response| {
                handled.push(response.status)
            });
    }

    transport.last().respond(404, "");
    assert!(failures.entries().is_empty());
    assert_eq!(handled.entries(), [404]);
}

#[test]
fn transport_failures_skip_response_handlers() {
    let (client, transport) = ready_client();
    let responses = Log::new();
    let failures = Log::new();
    {
        let responses = responses.clone();
        let failures = failures.clone();
        client
            .submit(Request::get("/flaky"), transport.send())
            .on_response(move |_, _, _| responses.push(()))
            .on_failure(move |error| failures.push(error));
    }

    transport.last().fail("connection reset");
    assert!(responses.entries().is_empty());
    assert_eq!(failures.entries(), [Error::TransportFailed("connection reset".into())]);
}

#[test]
fn decoded_handlers_receive_the_model() {
    let (client, transport) = ready_client();
    let items = Log::new();
    let sink = items.clone();
    client
        .submit(Request::get("/items/1"), transport.send())
        .on_decoded(None, promise_gate::success_status, Json::<Item>::new(), move |session, _, item| {
            sink.push((session.token.clone(), item))
        });

    transport.last().respond(200, r#"{"id": 1, "name": "lamp"}"#);
    assert_eq!(
        items.entries(),
        [(
            Some("t".to_owned()),
            Ok(Item {
                id: 1,
                name: "lamp".into()
            })
        )]
    );
}

#[test]
fn decode_errors_reach_the_handler() {
    let (client, transport) = ready_client();
    let results = Log::new();
    let sink = results.clone();
    client
        .submit(Request::get("/items/1"), transport.send())
        .on_decoded(None, promise_gate::success_status, Json::<Item>::new(), move |_, _, item| {
            sink.push(item)
        });

    transport.last().respond(200, r#"{"id": "one"}"#);
    assert!(matches!(results.entries().as_slice(), [Err(Error::DecodeFailed(_))]));
}

#[test]
fn closures_work_as_deserializers() {
    let (client, transport) = ready_client();
    let lengths = Log::new();
    let sink = lengths.clone();
    let count_bytes = |payload: &[u8]| -> Result<usize, Error> { Ok(payload.len()) };
    client
        .submit(Request::get("/raw"), transport.send())
        .on_decoded(None, |_| true, count_bytes, move |_, _, length| sink.push(length));

    transport.last().respond(500, "12345");
    assert_eq!(lengths.entries(), [Ok(5)]);
}

#[test]
fn handlers_run_on_their_context() {
    let (client, transport) = ready_client();
    let context: Arc<dyn Executor> = Arc::new(SerialExecutor::new("response-context").unwrap());
    let (tx, rx) = std::sync::mpsc::channel();
    let failures = tx.clone();
    client
        .submit(Request::get("/a"), transport.send())
        .on_response_with(Some(context.clone()), promise_gate::success_status, move |_, _, _| {
            tx.send(("response", thread::current().name().map(str::to_owned)))
                .unwrap()
        })
        .on_failure_with(Some(context), Vec::<u16>::new(), move |_| {
            failures.send(("failure", None)).unwrap()
        });

    transport.last().respond(200, "");
    let (side, name) = rx.recv().unwrap();
    assert_eq!(side, "response");
    assert_eq!(name.as_deref(), Some("response-context"));
    // the failure handler was consumed without running
    assert!(rx.recv().is_err());
}
