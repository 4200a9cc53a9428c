use std::time::Duration;

use ansibug_debuggee::breakpoints::{MODIFIED_SOURCE_MESSAGE, NOT_LOADED_MESSAGE};
use ansibug_debuggee::{LineKind, StartOptions};
use serde_json::json;

use crate::harness::{debugger_in, eventually, DapClient};

const PLAY: &str = "/srv/ansible/site.yml";

#[test]
fn pending_breakpoint_is_verified_when_ansible_loads_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);

    let response = client.set_breakpoints(PLAY, &[4]);
    let breakpoint = &response["body"]["breakpoints"][0];
    let id = breakpoint["id"].as_i64().expect("breakpoint id");
    assert_eq!(breakpoint["verified"], false);
    assert_eq!(breakpoint["message"], NOT_LOADED_MESSAGE);
    assert!(debugger.lookup_breakpoint(PLAY, 4).is_none());

    debugger.register_line(PLAY, 3, LineKind::ValidStart);
    debugger.register_line(PLAY, 6, LineKind::Invalid);

    let event = client.wait_for_event("breakpoint");
    assert_eq!(event["body"]["reason"], "changed");
    assert_eq!(event["body"]["breakpoint"]["id"], id);
    assert_eq!(event["body"]["breakpoint"]["verified"], true);
    assert_eq!(event["body"]["breakpoint"]["line"], 3);

    let event = client.wait_for_event("breakpoint");
    assert_eq!(event["body"]["breakpoint"]["id"], id);
    assert_eq!(event["body"]["breakpoint"]["endLine"], 5);

    let hit = debugger.lookup_breakpoint(PLAY, 5).expect("breakpoint covers line 5");
    assert_eq!(hit.id, id);
    assert!(debugger.lookup_breakpoint(PLAY, 6).is_none());

    debugger.shutdown();
}

#[test]
fn breakpoints_resolve_to_the_enclosing_task() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    debugger.register_line(PLAY, 3, LineKind::ValidStart);
    debugger.register_line(PLAY, 5, LineKind::Invalid);

    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);
    let response = client.set_breakpoints(PLAY, &[1, 4, 9]);
    let breakpoints = response["body"]["breakpoints"].as_array().unwrap();

    assert_eq!(breakpoints.len(), 3);
    assert_eq!(breakpoints[0]["verified"], false);
    assert_eq!(breakpoints[0]["message"], "Breakpoint cannot be set here");
    assert_eq!(breakpoints[1]["verified"], true);
    assert_eq!(breakpoints[1]["line"], 3);
    assert_eq!(breakpoints[1]["endLine"], 4);
    assert_eq!(breakpoints[2]["verified"], false);
    assert_eq!(breakpoints[2]["line"], 5);

    let ids: Vec<i64> = breakpoints.iter().map(|bp| bp["id"].as_i64().unwrap()).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

    debugger.shutdown();
}

#[test]
fn modified_source_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    debugger.register_line(PLAY, 2, LineKind::ValidStart);
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);

    let response = client.request(
        "setBreakpoints",
        json!({"source": {"path": PLAY}, "breakpoints": [{"line": 2}], "sourceModified": true}),
    );
    let breakpoint = &response["body"]["breakpoints"][0];
    assert_eq!(breakpoint["verified"], false);
    assert_eq!(breakpoint["message"], MODIFIED_SOURCE_MESSAGE);
    assert!(debugger.lookup_breakpoint(PLAY, 2).is_none());

    debugger.shutdown();
}

#[test]
fn breakpoints_are_not_hit_once_the_client_leaves() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    debugger.register_line(PLAY, 2, LineKind::ValidStart);
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();

    let mut client = DapClient::connect(&address);
    client.set_breakpoints(PLAY, &[2]);
    assert!(debugger.lookup_breakpoint(PLAY, 2).is_some());

    drop(client);
    eventually("the session to close", || !debugger.is_connected());
    assert!(debugger.lookup_breakpoint(PLAY, 2).is_none());

    // A new client sees the breakpoints the last one left behind.
    let mut client = DapClient::connect(&address);
    client.configuration_done();
    assert!(debugger.lookup_breakpoint(PLAY, 2).is_some());

    debugger.shutdown();
}

#[test]
fn path_mappings_translate_client_paths() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    debugger.register_line(PLAY, 2, LineKind::ValidStart);
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    let mut client = DapClient::connect(&address);

    client.send_path_mappings(json!([
        {"local_root": "/home/dev/project/", "remote_root": "/srv/ansible/"},
    ]));
    let response = client.set_breakpoints("/home/dev/project/site.yml", &[2]);
    assert_eq!(response["body"]["breakpoints"][0]["verified"], true);
    assert_eq!(
        response["body"]["breakpoints"][0]["source"]["path"],
        "/home/dev/project/site.yml"
    );

    assert!(debugger.lookup_breakpoint(PLAY, 2).is_some());
    assert_eq!(debugger.to_client_path(PLAY), "/home/dev/project/site.yml");
    assert_eq!(debugger.to_client_path("/etc/hosts"), "/etc/hosts");

    // An unrelated output event leaves the mapping alone.
    client.send(&json!({
        "seq": 99,
        "type": "event",
        "event": "output",
        "body": {"category": "console", "output": "hi"},
    }));
    client.configuration_done();
    assert_eq!(debugger.debug_configuration().path_mappings.len(), 1);

    assert!(client.drain(Duration::from_millis(50)).is_empty());
    debugger.shutdown();
}
