//! Debuggee side of the ansibug Ansible debugger.
//!
//! An [`AnsibleDebugger`] lives inside `ansible-playbook`. It opens a socket
//! that a Debug Adapter Protocol client connects to (or connects out to one),
//! answers breakpoint requests itself, and forwards everything that needs
//! live playbook state to the attached [`DebugStrategy`].
//!
//! Threads involved:
//! - `ansibug-debugger` accepts or connects, then writes queued messages.
//! - `ansibug-recv` reads and dispatches client messages for one session.
//! - the runtime's own threads, which call [`AnsibleDebugger::register_line`],
//!   [`AnsibleDebugger::lookup_breakpoint`] and [`AnsibleDebugger::send`].

pub mod breakpoints;
pub mod debugger;
pub mod discovery;
mod dispatch;
pub mod error;
pub mod ids;
pub mod path_mapping;
mod send_queue;
mod session;
pub mod strategy;
pub mod transport;

pub use ansibug_config::DebuggeeConfig;

pub use crate::breakpoints::{LineBreakpoint, LineKind};
pub use crate::debugger::{AnsibleDebugger, SocketMode, StartOptions, StrategyAttachment};
pub use crate::discovery::PlaybookProcessInfo;
pub use crate::error::{DebuggeeError, DebuggeeResult};
pub use crate::path_mapping::{DebugConfiguration, PathMapping};
pub use crate::strategy::DebugStrategy;
pub use crate::transport::{BoundAddress, StreamWrapper, TransportError};

/// Install logging for the debuggee. Only the first call has any effect.
pub fn init(config: &DebuggeeConfig) {
    if ansibug_config::init_tracing(&config.logging) {
        tracing::debug!(
            target: "ansibug.debuggee",
            version = env!("CARGO_PKG_VERSION"),
            "logging initialised"
        );
    }
}
