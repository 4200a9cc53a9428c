//! TCP transport for the debug session.
//!
//! The socket is plain TCP. TLS, when wanted, is layered on by a
//! [`StreamWrapper`] supplied by the embedding process. Cancellation is
//! cooperative: the listener is polled, and the live socket is shut down so
//! that any blocked read or write returns.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{
    IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs,
};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BoxedReader = Box<dyn Read + Send>;
pub type BoxedWriter = Box<dyn Write + Send>;

/// Hook that layers a protocol such as TLS over a freshly established socket.
///
/// `server_side` is true for accepted connections. The returned halves must
/// be usable from different threads at the same time.
pub trait StreamWrapper: Send + Sync {
    fn wrap(&self, stream: TcpStream, server_side: bool) -> io::Result<(BoxedReader, BoxedWriter)>;
}

/// Host and port the debug socket is reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundAddress {
    pub host: String,
    pub port: u16,
    pub is_ipv6: bool,
}

impl BoundAddress {
    pub(crate) fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            is_ipv6: addr.is_ipv6(),
        }
    }

    /// The address as requested, before anything is resolved.
    pub(crate) fn nominal(host: &str, port: u16) -> Self {
        let host = strip_brackets(host);
        Self {
            host: host.to_owned(),
            port,
            is_ipv6: matches!(host.parse::<IpAddr>(), Ok(IpAddr::V6(_))),
        }
    }
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6 {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|host| host.strip_suffix(']'))
        .unwrap_or(host)
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = (strip_brackets(host), port)
        .to_socket_addrs()
        .map_err(|_| TransportError::Resolve(format!("{host}:{port}")))?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::Resolve(format!("{host}:{port}")));
    }
    Ok(addrs)
}

/// Cancellation shared by everything blocking on the transport.
#[derive(Default)]
pub(crate) struct Canceller {
    token: CancellationToken,
    socket: Mutex<Option<TcpStream>>,
}

impl Canceller {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Idempotent.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
        if let Some(socket) = self.socket.lock().as_ref() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    /// Make `socket` the one shut down by [`Self::cancel`].
    pub(crate) fn register(&self, socket: &TcpStream) -> Result<(), TransportError> {
        let mut slot = self.socket.lock();
        // Checked under the lock so a concurrent cancel either sees the
        // socket or is seen here.
        if self.token.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        *slot = Some(socket.try_clone()?);
        Ok(())
    }

    pub(crate) fn clear(&self) {
        self.socket.lock().take();
    }
}

/// One established session socket.
pub(crate) struct Connection {
    pub(crate) reader: BoxedReader,
    pub(crate) writer: BoxedWriter,
    /// Raw handle used to shut the session down.
    pub(crate) socket: TcpStream,
    pub(crate) peer: Option<SocketAddr>,
}

impl Connection {
    /// Wrap `stream` for a session.
    ///
    /// The socket is registered with `canceller` before `wrapper` runs, since
    /// a handshake may block on the peer. On success it stays registered and
    /// the session clears it when done.
    fn establish(
        stream: TcpStream,
        canceller: &Canceller,
        wrapper: Option<&dyn StreamWrapper>,
        server_side: bool,
    ) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        let socket = stream.try_clone()?;
        canceller.register(&socket)?;

        let wrapped: io::Result<(BoxedReader, BoxedWriter)> = match wrapper {
            Some(wrapper) => wrapper.wrap(stream, server_side),
            None => stream.try_clone().map(|reader| {
                let reader: BoxedReader = Box::new(reader);
                let writer: BoxedWriter = Box::new(stream);
                (reader, writer)
            }),
        };
        match wrapped {
            Ok((reader, writer)) if !canceller.is_cancelled() => Ok(Self {
                reader,
                writer,
                socket,
                peer,
            }),
            Ok(_) => {
                canceller.clear();
                Err(TransportError::Cancelled)
            }
            Err(err) => {
                canceller.clear();
                let _ = socket.shutdown(Shutdown::Both);
                if canceller.is_cancelled() {
                    Err(TransportError::Cancelled)
                } else {
                    Err(err.into())
                }
            }
        }
    }
}

pub(crate) struct Listener {
    inner: TcpListener,
    address: BoundAddress,
}

impl Listener {
    pub(crate) fn bind(host: &str, port: u16) -> Result<Self, TransportError> {
        let mut last_error = None;
        for addr in resolve(host, port)? {
            match TcpListener::bind(addr) {
                Ok(inner) => {
                    inner.set_nonblocking(true)?;
                    let address = BoundAddress::from_socket_addr(inner.local_addr()?);
                    return Ok(Self { inner, address });
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(TransportError::Bind {
            addr: format!("{host}:{port}"),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address")),
        })
    }

    pub(crate) fn address(&self) -> &BoundAddress {
        &self.address
    }

    /// Wait for the next peer, checking `canceller` between polls.
    pub(crate) fn accept(
        &self,
        canceller: &Canceller,
        wrapper: Option<&dyn StreamWrapper>,
    ) -> Result<Connection, TransportError> {
        loop {
            if canceller.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            match self.inner.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    return Connection::establish(stream, canceller, wrapper, true);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(CANCEL_POLL_INTERVAL);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}

pub(crate) fn connect(
    host: &str,
    port: u16,
    canceller: &Canceller,
    wrapper: Option<&dyn StreamWrapper>,
) -> Result<Connection, TransportError> {
    let mut last_error = None;
    for addr in resolve(host, port)? {
        if canceller.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match dial(canceller, move || TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT))? {
            Ok(stream) => return Connection::establish(stream, canceller, wrapper, false),
            Err(err) => last_error = Some(err),
        }
    }
    Err(TransportError::Connect {
        addr: format!("{host}:{port}"),
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address")),
    })
}

/// Run a blocking `connect` on a helper thread and wait for it, giving up
/// once `canceller` fires.
///
/// An abandoned dial finishes on its own within its timeout and its socket is
/// dropped.
fn dial<F>(canceller: &Canceller, connect: F) -> Result<io::Result<TcpStream>, TransportError>
where
    F: FnOnce() -> io::Result<TcpStream> + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name("ansibug-connect".to_string())
        .spawn(move || {
            let _ = sender.send(connect());
        })?;

    loop {
        if canceller.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(result) => return Ok(result),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Ok(Err(io::Error::other("connect thread exited")));
            }
        }
    }
}
