//! The debugger object embedded in `ansible-playbook`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ansibug_config::DebuggeeConfig;
use ansibug_dap::{ClientMessage, Event, ServerMessage};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::breakpoints::{BreakpointRegistry, LineBreakpoint, LineKind};
use crate::discovery;
use crate::error::{DebuggeeError, DebuggeeResult};
use crate::ids::IdAllocator;
use crate::path_mapping::DebugConfiguration;
use crate::send_queue::SendQueue;
use crate::session::{self, ConnectionState};
use crate::strategy::{DebugStrategy, StrategyHandoff};
use crate::transport::{BoundAddress, Canceller, StreamWrapper};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    /// Connect out to a debug adapter that is already listening.
    Connect,
    /// Listen for debug adapters, one at a time, until shutdown.
    Listen,
}

#[derive(Clone)]
pub struct StartOptions {
    pub host: String,
    pub port: u16,
    pub mode: SocketMode,
    pub tls: Option<Arc<dyn StreamWrapper>>,
    pub playbook_file: Option<String>,
}

impl StartOptions {
    pub fn listen(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            mode: SocketMode::Listen,
            tls: None,
            playbook_file: None,
        }
    }

    pub fn connect(host: impl Into<String>, port: u16) -> Self {
        Self {
            mode: SocketMode::Connect,
            ..Self::listen(host, port)
        }
    }

    pub fn with_tls(mut self, wrapper: Arc<dyn StreamWrapper>) -> Self {
        self.tls = Some(wrapper);
        self
    }

    pub fn with_playbook_file(mut self, playbook_file: impl Into<String>) -> Self {
        self.playbook_file = Some(playbook_file.into());
        self
    }
}

/// State shared between the public handle, the connection thread and the
/// receive thread.
pub(crate) struct Shared {
    pub(crate) config: DebuggeeConfig,
    pub(crate) canceller: Canceller,
    pub(crate) queue: SendQueue,
    pub(crate) connection: ConnectionState,
    pub(crate) handoff: StrategyHandoff,
    pub(crate) breakpoints: BreakpointRegistry,
    pub(crate) debug_config: RwLock<DebugConfiguration>,
    pub(crate) ids: IdAllocator,
}

impl Shared {
    /// Returns `false` if no session is active and the message was dropped.
    pub(crate) fn send(&self, message: impl Into<ServerMessage>) -> bool {
        self.queue.push(message.into())
    }

    pub(crate) fn discovery_path(&self) -> PathBuf {
        let dir = discovery::discovery_dir(self.config.session.discovery_dir.as_deref());
        discovery::discovery_path(&dir, std::process::id())
    }

    fn cancel(&self) {
        self.canceller.cancel();
        self.queue.wake();
    }
}

/// Debuggee side of an ansibug session.
///
/// Owns the debug socket, the breakpoints and the handoff to the runtime
/// strategy. Cheap to share through an `Arc`; every method takes `&self`.
pub struct AnsibleDebugger {
    shared: Arc<Shared>,
    started: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnsibleDebugger {
    pub fn new(config: DebuggeeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                canceller: Canceller::default(),
                queue: SendQueue::default(),
                connection: ConnectionState::default(),
                handoff: StrategyHandoff::default(),
                breakpoints: BreakpointRegistry::new(),
                debug_config: RwLock::new(DebugConfiguration::default()),
                ids: IdAllocator::new(),
            }),
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Process-wide debugger, configured from `ANSIBUG_CONFIG` on first use.
    pub fn global() -> &'static AnsibleDebugger {
        static GLOBAL: OnceLock<AnsibleDebugger> = OnceLock::new();
        GLOBAL.get_or_init(|| AnsibleDebugger::new(DebuggeeConfig::load_from_env()))
    }

    pub fn config(&self) -> &DebuggeeConfig {
        &self.shared.config
    }

    /// Spawn the connection thread and wait for the socket address.
    ///
    /// In listen mode this is the bound address, so port 0 reports the
    /// ephemeral port. In connect mode it is the address as given.
    pub fn start(&self, options: StartOptions) -> DebuggeeResult<BoundAddress> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DebuggeeError::AlreadyStarted);
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("ansibug-debugger".to_string())
            .spawn(move || session::run(shared, options, sender))
            .map_err(DebuggeeError::Spawn)?;
        *self.worker.lock() = Some(handle);

        let address = match self.shared.config.session.start_timeout() {
            Some(timeout) => receiver.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => DebuggeeError::StartTimedOut,
                RecvTimeoutError::Disconnected => DebuggeeError::WorkerExited,
            })?,
            None => receiver.recv().map_err(|_| DebuggeeError::WorkerExited)?,
        }?;
        tracing::debug!(target: "ansibug.debuggee", %address, "debug socket ready");
        Ok(address)
    }

    /// Flush pending messages, then stop the connection thread.
    ///
    /// Waiting for the flush is bounded by `session.drain_timeout_ms`, so this
    /// returns even when the client has stopped reading.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        tracing::debug!(target: "ansibug.debuggee", "shutting down debugger");

        let session = &self.shared.config.session;
        if !self.shared.queue.wait_drained(session.drain_timeout()) {
            tracing::warn!(
                target: "ansibug.debuggee",
                timeout_ms = session.drain_timeout_ms,
                "timed out flushing messages to the debug adapter"
            );
        }

        self.shared.cancel();
        if worker.join().is_err() {
            tracing::error!(target: "ansibug.debuggee", "debugger thread panicked");
        }
    }

    /// Block until a client has connected, or the debugger has shut down.
    ///
    /// Returns `true` if a client connected. `None` uses
    /// `session.wait_for_client_timeout_ms`.
    pub fn wait_for_client(&self, timeout: Option<Duration>) -> bool {
        let timeout =
            timeout.unwrap_or_else(|| self.shared.config.session.wait_for_client_timeout());
        self.shared.connection.wait_for_client(timeout)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connection.is_connected()
    }

    /// Attach the runtime strategy until the returned guard is dropped.
    ///
    /// If a client is connected this also waits for it to finish
    /// configuring (sending breakpoints) so the runtime does not run past
    /// them.
    pub fn attach_strategy(&self, strategy: Arc<dyn DebugStrategy>) -> StrategyAttachment {
        self.shared.handoff.publish(Arc::clone(&strategy));
        tracing::debug!(target: "ansibug.debuggee", "strategy attached");
        let attachment = StrategyAttachment {
            shared: Arc::clone(&self.shared),
            strategy,
        };
        self.shared.connection.wait_configured();
        attachment
    }

    /// Run `f` with `strategy` attached.
    pub fn with_strategy<R>(&self, strategy: Arc<dyn DebugStrategy>, f: impl FnOnce() -> R) -> R {
        let _attachment = self.attach_strategy(strategy);
        f()
    }

    /// Record a line classification reported by the runtime and tell the
    /// client about breakpoints that moved or became verified.
    pub fn register_line(&self, path: &str, line: i64, kind: LineKind) {
        for breakpoint in self.shared.breakpoints.register_line(path, line, kind) {
            match Event::breakpoint_changed(breakpoint) {
                Ok(event) => {
                    self.shared.send(event);
                }
                Err(err) => tracing::warn!(
                    target: "ansibug.debuggee",
                    error = %err,
                    "failed to encode breakpoint event"
                ),
            }
        }
    }

    /// The breakpoint the runtime should stop on at `path:line`, if any.
    ///
    /// Always `None` while no client is connected.
    pub fn lookup_breakpoint(&self, path: &str, line: i64) -> Option<LineBreakpoint> {
        if !self.shared.queue.is_active() {
            return None;
        }
        self.shared.breakpoints.lookup(path, line)
    }

    pub fn next_thread_id(&self) -> i64 {
        self.shared.ids.next_thread_id()
    }

    pub fn next_stackframe_id(&self) -> i64 {
        self.shared.ids.next_stackframe_id()
    }

    pub fn next_variable_id(&self) -> i64 {
        self.shared.ids.next_variable_id()
    }

    /// Queue a message for the client. Returns `false` if no session is
    /// active and the message was dropped.
    pub fn send(&self, message: impl Into<ServerMessage>) -> bool {
        self.shared.send(message)
    }

    pub fn send_event<T: Serialize>(&self, event: &str, body: &T) -> bool {
        match Event::with_body(event, body) {
            Ok(event) => self.shared.send(event),
            Err(err) => {
                tracing::warn!(target: "ansibug.debuggee", event, error = %err, "failed to encode event");
                false
            }
        }
    }

    /// Translate a runtime path into the path the client knows it by.
    pub fn to_client_path(&self, path: &str) -> String {
        self.shared.debug_config.read().to_client_path(path)
    }

    pub fn debug_configuration(&self) -> DebugConfiguration {
        self.shared.debug_config.read().clone()
    }

    /// Handle one decoded client message on the calling thread.
    pub fn dispatch(&self, message: ClientMessage) {
        self.shared.dispatch(message);
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl Drop for AnsibleDebugger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keeps a strategy attached. Dropping it detaches the strategy and calls
/// [`DebugStrategy::ended`].
#[must_use = "the strategy is detached when the attachment is dropped"]
pub struct StrategyAttachment {
    shared: Arc<Shared>,
    strategy: Arc<dyn DebugStrategy>,
}

impl Drop for StrategyAttachment {
    fn drop(&mut self) {
        self.shared.handoff.unpublish();
        tracing::debug!(target: "ansibug.debuggee", "strategy detached");
        self.strategy.ended();
    }
}
