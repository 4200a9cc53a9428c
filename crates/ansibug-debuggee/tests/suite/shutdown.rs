use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ansibug_debuggee::{AnsibleDebugger, DebuggeeConfig, StartOptions};
use serde_json::json;

use crate::harness::{debugger_in, DapClient, TIMEOUT};

#[test]
fn shutdown_returns_even_if_the_client_stops_reading() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DebuggeeConfig::default();
    config.session.discovery_dir = Some(dir.path().to_path_buf());
    config.session.drain_timeout_ms = 200;
    let debugger = AnsibleDebugger::new(config);
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();

    // Connected but never reads.
    let _peer = TcpStream::connect((address.host.as_str(), address.port)).unwrap();
    assert!(debugger.wait_for_client(Some(TIMEOUT)));

    let chunk = "x".repeat(64 * 1024);
    for _ in 0..256 {
        debugger.send_event("output", &json!({"category": "stdout", "output": chunk}));
    }

    let started = Instant::now();
    debugger.shutdown();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "shutdown took {:?}",
        started.elapsed()
    );
    assert!(!debugger.send_event("output", &json!({"output": "late"})));
}

#[test]
fn shutdown_flushes_queued_messages() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);
    client.configuration_done();

    for n in 0..20 {
        assert!(debugger.send_event("output", &json!({"category": "console", "output": format!("{n}\n")})));
    }
    debugger.shutdown();

    let outputs: Vec<String> = client
        .drain(Duration::from_millis(200))
        .into_iter()
        .filter(|msg| msg["event"] == "output")
        .map(|msg| msg["body"]["output"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (0..20).map(|n| format!("{n}\n")).collect();
    assert_eq!(outputs, expected);
}

#[test]
fn shutdown_releases_threads_waiting_for_a_client() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = Arc::new(debugger_in(dir.path()));
    debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();

    let waiter = {
        let debugger = Arc::clone(&debugger);
        thread::spawn(move || debugger.wait_for_client(Some(Duration::from_secs(30))))
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    debugger.shutdown();
    assert!(!waiter.join().unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn pending_request_is_abandoned_when_the_session_ends() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);
    client.configuration_done();
    client.send_request("threads", json!({}));
    thread::sleep(Duration::from_millis(50));

    // No strategy ever attaches; shutdown must not hang on the waiting request.
    let started = Instant::now();
    debugger.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn messages_outside_a_session_are_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    assert!(!debugger.send_event("output", &json!({"output": "early"})));

    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    assert!(!debugger.send_event("output", &json!({"output": "still early"})));

    let mut client = DapClient::connect(&address);
    client.configuration_done();
    assert!(debugger.send_event("output", &json!({"output": "delivered"})));
    let event = client.wait_for_event("output");
    assert_eq!(event["body"]["output"], "delivered");
    debugger.shutdown();
}
