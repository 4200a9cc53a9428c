use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ansibug_debuggee::discovery::{discovery_path, PlaybookProcessInfo};
use ansibug_debuggee::transport::{BoxedReader, BoxedWriter};
use ansibug_debuggee::{DebuggeeError, StartOptions, StreamWrapper, TransportError};

use crate::harness::{debugger_in, eventually, DapClient, FakeStrategy};

#[test]
fn listen_mode_publishes_a_discovery_file() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger
        .start(StartOptions::listen("127.0.0.1", 0).with_playbook_file("/srv/site.yml"))
        .unwrap();
    assert_eq!(address.to_string(), format!("127.0.0.1:{}", address.port));

    let path = discovery_path(dir.path(), std::process::id());
    let info = PlaybookProcessInfo::read(&path).unwrap();
    assert_eq!(
        info,
        PlaybookProcessInfo {
            pid: std::process::id(),
            host: "127.0.0.1".to_string(),
            port: address.port,
            is_ipv6: false,
            use_tls: false,
            playbook_file: Some("/srv/site.yml".to_string()),
        }
    );

    debugger.shutdown();
    assert!(!path.exists(), "discovery file should be removed on shutdown");
}

#[test]
fn listen_mode_accepts_clients_one_after_another() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();

    let mut first = DapClient::connect(&address);
    assert_eq!(first.configuration_done()["seq"], 1);
    drop(first);
    eventually("the first session to close", || !debugger.is_connected());

    let mut second = DapClient::connect(&address);
    let response = second.configuration_done();
    assert_eq!(response["success"], true);
    assert_eq!(response["seq"], 1, "sequence numbers restart per session");

    debugger.shutdown();
}

#[test]
fn connect_mode_ends_after_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = adapter.local_addr().unwrap().port();

    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::connect("127.0.0.1", port)).unwrap();
    assert_eq!(address.port, port);
    assert_eq!(address.host, "127.0.0.1");

    let (stream, _) = adapter.accept().unwrap();
    let mut client = DapClient::from_stream(stream);
    client.configuration_done();

    let strategy = Arc::new(FakeStrategy::default());
    let attached = debugger.attach_strategy(strategy.clone());
    drop(client);

    eventually("the strategy to be told the debugger ended", || {
        strategy.ended_count() == 1
    });
    assert!(!debugger.is_connected());
    assert!(!dir.path().join(format!("ANSIBUG-{}", std::process::id())).exists());

    drop(attached);
    assert_eq!(strategy.ended_count(), 2);
    debugger.shutdown();
}

#[test]
fn bind_failures_are_returned_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let debugger = debugger_in(dir.path());
    let err = debugger
        .start(StartOptions::listen("127.0.0.1", port))
        .unwrap_err();
    assert!(
        matches!(err, DebuggeeError::Transport(TransportError::Bind { .. })),
        "unexpected error: {err}"
    );
    debugger.shutdown();
}

#[derive(Default)]
struct CountingWrapper {
    wrapped: AtomicUsize,
}

impl StreamWrapper for CountingWrapper {
    fn wrap(&self, stream: TcpStream, server_side: bool) -> io::Result<(BoxedReader, BoxedWriter)> {
        assert!(server_side);
        self.wrapped.fetch_add(1, Ordering::SeqCst);
        Ok((Box::new(stream.try_clone()?), Box::new(stream)))
    }
}

#[test]
fn stream_wrapper_is_applied_and_advertised() {
    let dir = tempfile::tempdir().unwrap();
    let wrapper = Arc::new(CountingWrapper::default());
    let debugger = debugger_in(dir.path());
    let address = debugger
        .start(StartOptions::listen("127.0.0.1", 0).with_tls(wrapper.clone()))
        .unwrap();

    let info = PlaybookProcessInfo::read(&discovery_path(dir.path(), std::process::id())).unwrap();
    assert!(info.use_tls);

    let mut client = DapClient::connect(&address);
    assert_eq!(client.configuration_done()["success"], true);
    assert_eq!(wrapper.wrapped.load(Ordering::SeqCst), 1);
    debugger.shutdown();
}

#[test]
fn wait_for_client_returns_once_a_client_connects() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = debugger_in(dir.path());
    let address = debugger.start(StartOptions::listen("127.0.0.1", 0)).unwrap();
    assert!(!debugger.wait_for_client(Some(Duration::from_millis(20))));

    let _client = DapClient::connect(&address);
    assert!(debugger.wait_for_client(None));
    debugger.shutdown();
}

/// Waits for one byte from the peer before handing the stream over.
struct HandshakeWrapper;

impl StreamWrapper for HandshakeWrapper {
    fn wrap(&self, mut stream: TcpStream, _server_side: bool) -> io::Result<(BoxedReader, BoxedWriter)> {
        let mut hello = [0u8; 1];
        stream.read_exact(&mut hello)?;
        Ok((Box::new(stream.try_clone()?), Box::new(stream)))
    }
}

#[test]
fn shutdown_returns_with_a_peer_stalled_in_the_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let debugger = Arc::new(debugger_in(dir.path()));
    let address = debugger
        .start(StartOptions::listen("127.0.0.1", 0).with_tls(Arc::new(HandshakeWrapper)))
        .unwrap();
    let _silent_peer = TcpStream::connect((address.host.as_str(), address.port)).unwrap();
    // Let the debugger thread accept and enter the handshake.
    std::thread::sleep(Duration::from_millis(200));

    let (done_tx, done_rx) = mpsc::channel();
    {
        let debugger = Arc::clone(&debugger);
        std::thread::spawn(move || {
            debugger.shutdown();
            let _ = done_tx.send(());
        });
    }
    assert!(
        done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
        "shutdown blocked behind the handshake"
    );
    assert!(!debugger.is_connected());
}
