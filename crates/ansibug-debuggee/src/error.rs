use thiserror::Error;

use crate::transport::TransportError;

pub type DebuggeeResult<T> = Result<T, DebuggeeError>;

#[derive(Error, Debug)]
pub enum DebuggeeError {
    #[error("the debugger has already been started")]
    AlreadyStarted,
    #[error("timed out waiting for the debug socket address")]
    StartTimedOut,
    #[error("the debugger thread exited before reporting a socket address")]
    WorkerExited,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to spawn debugger thread: {0}")]
    Spawn(#[source] std::io::Error),
}
