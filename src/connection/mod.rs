//! Connection state.
//!
//! A [`Connection`] is owned by the executor's registry. It holds the
//! shared transport, at most one live [`Listener`], the fixed encoding,
//! and the lifecycle state. Dropping a connection stops its listener and
//! releases the socket exactly once.

pub mod listener;
pub mod transport;

pub use listener::{ExitCause, Listener, ListenerContext};
pub use transport::{SharedTransport, Transport};

use std::fmt;
use std::sync::Arc;

use crate::constants::ready_state;
use crate::encoding::TextEncoding;
use crate::tls::UpgradeState;

/// Host-assigned connection token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wraps a token.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Connection lifecycle.
///
/// Moves only forward: CONNECTING -> OPEN -> CLOSED, or CONNECTING ->
/// CLOSED on connect failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// Socket is being established.
    Connecting,
    /// Socket is open and a listener is running.
    Open,
    /// Terminal.
    Closed,
}

impl ReadyState {
    /// Host attribute code.
    pub fn code(self) -> i64 {
        match self {
            Self::Connecting => ready_state::CONNECTING,
            Self::Open => ready_state::OPEN,
            Self::Closed => ready_state::CLOSED,
        }
    }

    /// Parses a host attribute code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            ready_state::CONNECTING => Some(Self::Connecting),
            ready_state::OPEN => Some(Self::Open),
            ready_state::CLOSED => Some(Self::Closed),
            _ => None,
        }
    }
}

/// One socket bridge, owned by the executor.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    host: String,
    port: u16,
    encoding: TextEncoding,
    ready_state: ReadyState,
    transport: Arc<SharedTransport>,
    listener: Option<Listener>,
    generation: u64,
    upgrade: UpgradeState,
}

impl Connection {
    /// Creates an OPEN connection over an established stream.
    pub fn new(
        id: ConnectionId,
        host: String,
        port: u16,
        encoding: TextEncoding,
        transport: Transport,
    ) -> Self {
        Self {
            id,
            host,
            port,
            encoding,
            ready_state: ReadyState::Open,
            transport: Arc::new(SharedTransport::new(transport)),
            listener: None,
            generation: 0,
            upgrade: UpgradeState::Plain,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Target host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Target port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Fixed encoding.
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Current lifecycle state.
    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// Whether the connection is OPEN.
    pub fn is_open(&self) -> bool {
        self.ready_state == ReadyState::Open
    }

    /// Shared transport.
    pub fn transport(&self) -> &Arc<SharedTransport> {
        &self.transport
    }

    /// TLS upgrade progress.
    pub fn upgrade_state(&self) -> UpgradeState {
        self.upgrade
    }

    /// Records TLS upgrade progress.
    pub fn set_upgrade_state(&mut self, state: UpgradeState) {
        log::debug!("[Tls] {} {:?} -> {:?}", self.id, self.upgrade, state);
        self.upgrade = state;
    }

    /// Generation of the current (or last) listener.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bumps and returns the listener generation for a new listener.
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Installs a freshly spawned listener.
    ///
    /// # Panics
    ///
    /// Debug builds assert that no listener is installed.
    pub fn attach_listener(&mut self, listener: Listener) {
        debug_assert!(self.listener.is_none(), "second listener on {}", self.id);
        self.listener = Some(listener);
    }

    /// Whether a listener thread is installed and running.
    pub fn has_live_listener(&self) -> bool {
        self.listener.as_ref().is_some_and(Listener::is_running)
    }

    /// Hard-stops and joins the current listener, if any.
    pub fn stop_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop_and_join();
        }
    }

    /// Stops the listener, closes the transport, and marks CLOSED.
    ///
    /// Idempotent.
    pub fn shutdown(&mut self) {
        self.stop_listener();
        self.transport.lock().close();
        self.ready_state = ReadyState::Closed;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
