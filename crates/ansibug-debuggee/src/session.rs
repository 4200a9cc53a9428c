//! Background connection thread and per-session loops.

use std::io::{BufReader, BufWriter};
use std::net::Shutdown;
use std::path::PathBuf;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ansibug_dap::{codec, ClientMessage, DecodeError, Response};
use parking_lot::{Condvar, Mutex};

use crate::debugger::{Shared, SocketMode, StartOptions};
use crate::discovery::PlaybookProcessInfo;
use crate::send_queue::Next;
use crate::transport::{
    self, BoundAddress, BoxedReader, BoxedWriter, Connection, Listener, TransportError,
};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct Flags {
    connected: bool,
    ever_connected: bool,
    configured: bool,
    terminated: bool,
}

/// Connection latches shared with threads waiting on the client.
#[derive(Default)]
pub(crate) struct ConnectionState {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl ConnectionState {
    fn open(&self) {
        let mut flags = self.flags.lock();
        flags.connected = true;
        flags.ever_connected = true;
        flags.configured = false;
        self.changed.notify_all();
    }

    fn close(&self) {
        let mut flags = self.flags.lock();
        flags.connected = false;
        self.changed.notify_all();
    }

    fn terminate(&self) {
        let mut flags = self.flags.lock();
        flags.connected = false;
        flags.configured = true;
        flags.terminated = true;
        self.changed.notify_all();
    }

    pub(crate) fn mark_configured(&self) {
        let mut flags = self.flags.lock();
        flags.configured = true;
        self.changed.notify_all();
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.flags.lock().connected
    }

    /// Block while a connected client has not sent `configurationDone`.
    pub(crate) fn wait_configured(&self) {
        let mut flags = self.flags.lock();
        self.changed.wait_while(&mut flags, |flags| {
            flags.connected && !flags.configured && !flags.terminated
        });
    }

    /// Returns `true` if a client has ever connected.
    pub(crate) fn wait_for_client(&self, timeout: Duration) -> bool {
        let mut flags = self.flags.lock();
        self.changed.wait_while_for(
            &mut flags,
            |flags| !flags.ever_connected && !flags.terminated,
            timeout,
        );
        flags.ever_connected
    }
}

type AddressSender = SyncSender<Result<BoundAddress, TransportError>>;

fn publish_address(sender: &mut Option<AddressSender>, address: BoundAddress) {
    if let Some(sender) = sender.take() {
        // The caller may have stopped waiting after a start timeout.
        let _ = sender.send(Ok(address));
    }
}

/// Body of the `ansibug-debugger` thread.
pub(crate) fn run(shared: Arc<Shared>, options: StartOptions, address: AddressSender) {
    tracing::info!(
        target: "ansibug.debuggee",
        mode = ?options.mode,
        host = %options.host,
        port = options.port,
        use_tls = options.tls.is_some(),
        "setting up debug socket"
    );

    let mut address = Some(address);
    let mut discovery_file = None;
    let outcome = match options.mode {
        SocketMode::Listen => serve(&shared, &options, &mut address, &mut discovery_file),
        SocketMode::Connect => connect_once(&shared, &options, &mut address),
    };
    match outcome {
        Ok(()) | Err(TransportError::Cancelled) => {}
        Err(err) => {
            tracing::error!(target: "ansibug.debuggee", error = %err, "debug socket failed");
            if let Some(sender) = address.take() {
                let _ = sender.send(Err(err));
            }
        }
    }

    if let Some(path) = discovery_file {
        if let Err(err) = crate::discovery::remove(&path) {
            tracing::warn!(
                target: "ansibug.debuggee",
                path = %path.display(),
                error = %err,
                "failed to remove discovery file"
            );
        }
    }

    shared.queue.deactivate();
    shared.connection.terminate();
    shared.handoff.end_session();
    if let Some(strategy) = shared.handoff.current() {
        strategy.ended();
    }
    tracing::debug!(target: "ansibug.debuggee", "debugger thread finished");
}

fn serve(
    shared: &Arc<Shared>,
    options: &StartOptions,
    address: &mut Option<AddressSender>,
    discovery_file: &mut Option<PathBuf>,
) -> Result<(), TransportError> {
    let listener = Listener::bind(&options.host, options.port)?;
    let bound = listener.address().clone();
    tracing::info!(target: "ansibug.debuggee", address = %bound, "listening for debug adapter");

    let info = PlaybookProcessInfo {
        pid: std::process::id(),
        host: bound.host.clone(),
        port: bound.port,
        is_ipv6: bound.is_ipv6,
        use_tls: options.tls.is_some(),
        playbook_file: options.playbook_file.clone(),
    };
    let path = shared.discovery_path();
    match info.write(&path) {
        Ok(()) => *discovery_file = Some(path),
        Err(err) => tracing::warn!(
            target: "ansibug.debuggee",
            path = %path.display(),
            error = %err,
            "failed to write discovery file"
        ),
    }
    publish_address(address, bound);

    loop {
        match listener.accept(&shared.canceller, options.tls.as_deref()) {
            Ok(connection) => run_session(shared, connection),
            Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
            Err(err) => {
                tracing::warn!(target: "ansibug.debuggee", error = %err, "failed to accept debug adapter");
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
        }
        if shared.canceller.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
    }
}

fn connect_once(
    shared: &Arc<Shared>,
    options: &StartOptions,
    address: &mut Option<AddressSender>,
) -> Result<(), TransportError> {
    publish_address(address, BoundAddress::nominal(&options.host, options.port));
    let connection = transport::connect(
        &options.host,
        options.port,
        &shared.canceller,
        options.tls.as_deref(),
    )?;
    run_session(shared, connection);
    Ok(())
}

/// Serve one connected client. `connection.socket` is already registered
/// with the canceller.
fn run_session(shared: &Arc<Shared>, connection: Connection) {
    let Connection {
        reader,
        writer,
        socket,
        peer,
    } = connection;

    let peer = peer.map(|peer| peer.to_string()).unwrap_or_default();
    tracing::info!(target: "ansibug.debuggee", %peer, "debug adapter connected");

    shared.handoff.begin_session();
    shared.queue.activate();
    shared.connection.open();

    let receiver = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("ansibug-recv".to_string())
            .spawn(move || receive_loop(&shared, reader))
    };
    let (outcome, receiver) = match receiver {
        Ok(handle) => (drain_loop(shared, writer), Some(handle)),
        Err(err) => (Err(TransportError::Io(err)), None),
    };

    let dropped = shared.queue.deactivate();
    shared.connection.close();
    shared.handoff.end_session();
    let _ = socket.shutdown(Shutdown::Both);
    shared.canceller.clear();
    if let Some(receiver) = receiver {
        if receiver.join().is_err() {
            tracing::error!(target: "ansibug.debuggee", "receive thread panicked");
        }
    }

    if dropped > 0 {
        tracing::debug!(target: "ansibug.debuggee", dropped, "discarded undelivered messages");
    }
    match outcome {
        Ok(()) | Err(TransportError::Cancelled) => {
            tracing::info!(target: "ansibug.debuggee", %peer, "debug adapter disconnected");
        }
        Err(err) => {
            tracing::warn!(target: "ansibug.debuggee", %peer, error = %err, "debug session lost");
        }
    }
}

/// Body of the `ansibug-recv` thread: read frames and dispatch them in order.
fn receive_loop(shared: &Shared, reader: BoxedReader) {
    let mut reader = BufReader::new(reader);
    loop {
        let frame = match codec::read_frame(&mut reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!(target: "ansibug.dap", "debug adapter closed the connection");
                break;
            }
            Err(err) => {
                if !shared.canceller.is_cancelled() {
                    tracing::warn!(target: "ansibug.dap", error = %err, "failed to read from debug adapter");
                }
                break;
            }
        };

        match ClientMessage::decode(&frame) {
            Ok(message) => shared.dispatch(message),
            Err(err) => reject(shared, err),
        }
    }
    shared.queue.close();
}

fn reject(shared: &Shared, err: DecodeError) {
    match err.request() {
        Some((seq, command)) => {
            tracing::warn!(target: "ansibug.dap", seq, command, error = %err, "rejecting request");
            shared.send(Response::error(seq, command, err.to_string()));
        }
        None => {
            tracing::warn!(target: "ansibug.dap", error = %err, "discarding undecodable message");
        }
    }
}

/// Write queued messages until the session closes or is cancelled.
fn drain_loop(shared: &Shared, writer: BoxedWriter) -> Result<(), TransportError> {
    let mut writer = BufWriter::new(writer);
    let mut seq = 1;
    loop {
        let mut message = match shared.queue.next(shared.canceller.token()) {
            Next::Message(message) => message,
            Next::Closed => return Ok(()),
            Next::Cancelled => return Err(TransportError::Cancelled),
        };
        message.set_seq(seq);
        seq += 1;

        tracing::debug!(target: "ansibug.dap", seq = seq - 1, message = message.name(), "sending message");
        let written = codec::write_json_message(&mut writer, &message);
        shared.queue.message_written();
        if let Err(err) = written {
            if shared.canceller.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            return Err(err.into());
        }
    }
}
