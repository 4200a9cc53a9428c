use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ansibug_debuggee::StartOptions;
use serde_json::json;

use crate::harness::{debugger_in, DapClient, FakeStrategy, TIMEOUT};

#[test]
fn unknown_commands_get_an_error_response() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);

    let response = client.request("restartFrame", json!({"frameId": 1}));
    assert_eq!(response["success"], false);
    assert_eq!(response["command"], "restartFrame");
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("unsupported request command"));

    let response = client.request("scopes", json!({"frameId": "top"}));
    assert_eq!(response["success"], false);
    assert_eq!(response["command"], "scopes");

    // The session survives both.
    assert_eq!(client.configuration_done()["success"], true);
    debugger.shutdown();
}

#[test]
fn garbage_frames_are_dropped_without_ending_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);

    client.send_raw(b"Content-Length: 9\r\n\r\nnot json!");
    client.send(&json!({"seq": 50, "type": "event", "event": "stopped"}));
    assert_eq!(client.configuration_done()["success"], true);
    debugger.shutdown();
}

#[test]
fn attach_waits_for_configuration_done() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = Arc::new(debugger_in(dir.path()));
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);
    assert!(debugger.wait_for_client(Some(TIMEOUT)));

    let strategy = Arc::new(FakeStrategy::default());
    let attach = {
        let debugger = Arc::clone(&debugger);
        let strategy = Arc::clone(&strategy);
        thread::spawn(move || {
            let _attached = debugger.attach_strategy(strategy);
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!attach.is_finished(), "attach returned before configurationDone");

    client.set_breakpoints("/srv/site.yml", &[1]);
    client.configuration_done();
    attach.join().unwrap();
    assert_eq!(strategy.ended_count(), 1);

    debugger.shutdown();
}

#[test]
fn runtime_requests_wait_for_a_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);
    client.configuration_done();

    let seq = client.send_request("threads", json!({}));
    assert!(
        client.next_message(Duration::from_millis(100)).is_none(),
        "threads answered without a strategy"
    );

    let strategy = Arc::new(FakeStrategy::default());
    let attached = debugger.attach_strategy(strategy.clone());
    let response = client.wait_for_response(seq);
    assert_eq!(response["success"], true);
    assert_eq!(response["body"]["threads"][0]["name"], "main");

    let response = client.request("stackTrace", json!({"threadId": 1}));
    assert_eq!(response["body"]["stackFrames"][0]["name"], "Gathering Facts");
    assert_eq!(client.request("next", json!({"threadId": 1}))["success"], true);
    assert_eq!(client.request("stepIn", json!({"threadId": 1}))["success"], true);
    assert_eq!(client.request("stepOut", json!({"threadId": 1}))["success"], true);
    let response = client.request("continue", json!({"threadId": 1}));
    assert_eq!(response["body"]["allThreadsContinued"], false);
    let response = client.request("evaluate", json!({"expression": "inventory_hostname"}));
    assert_eq!(response["body"]["result"], "<inventory_hostname>");

    assert_eq!(
        *strategy.calls.lock(),
        vec![
            "threads",
            "stackTrace 1",
            "next 1",
            "stepIn 1",
            "stepOut 1",
            "continue 1",
            "evaluate inventory_hostname",
        ]
    );

    drop(attached);
    assert_eq!(strategy.ended_count(), 1);
    debugger.shutdown();
}

#[test]
fn strategy_errors_are_reported_to_the_client() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);
    client.configuration_done();
    let _attached = debugger.attach_strategy(Arc::new(FakeStrategy::default()));

    let seq = client.send_request("evaluate", json!({"expression": "undefined_var"}));
    let response = client.wait_for_response(seq);
    assert_eq!(response["success"], false);
    assert_eq!(response["command"], "evaluate");
    assert_eq!(response["message"], "'undefined_var' is undefined");

    let response = client.request("variables", json!({"variablesReference": 3}));
    assert_eq!(response["success"], true);

    debugger.shutdown();
}

#[test]
fn responses_carry_increasing_sequence_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);

    let first = client.configuration_done();
    assert!(debugger.send_event("output", &json!({"category": "console", "output": "hi\n"})));
    let event = client.wait_for_event("output");
    let second = client.set_breakpoints("/srv/site.yml", &[]);

    assert_eq!(first["seq"], 1);
    assert_eq!(event["seq"], 2);
    assert_eq!(second["seq"], 3);
    debugger.shutdown();
}
