//! Commands executed by the executor.
//!
//! A [`Command`] carries everything needed to run without further host
//! interaction. [`dispatch`] is the single entry point; each variant's
//! handler lives in its own module and converts every failure into host
//! events.

pub mod close;
pub mod connect;
pub mod notify;
pub mod send;

use crate::bridge::{EventArg, EventName};
use crate::connection::{ConnectionId, ExitCause};
use crate::encoding::TextEncoding;
use crate::executor::Executor;
use crate::tls::{self, TrustPolicy};

/// One privileged operation.
#[derive(Debug)]
pub enum Command {
    /// Open a TCP connection and start its listener.
    Connect {
        /// Host-assigned id.
        connection_id: ConnectionId,
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Fixed connection encoding.
        encoding: TextEncoding,
    },
    /// Write bytes to an open connection.
    Send {
        /// Target connection.
        connection_id: ConnectionId,
        /// Already-encoded payload.
        bytes: Vec<u8>,
    },
    /// Upgrade an open connection to TLS in place.
    EnableTls {
        /// Target connection.
        connection_id: ConnectionId,
        /// Certificate trust policy for this upgrade.
        trust_policy: TrustPolicy,
    },
    /// Close a connection.
    Close {
        /// Target connection.
        connection_id: ConnectionId,
    },
    /// Invoke a host callback.
    Notify {
        /// Target connection.
        connection_id: ConnectionId,
        /// Callback.
        event: EventName,
        /// Optional argument; absent means a no-argument call.
        argument: Option<EventArg>,
    },
    /// A listener stopped on its own (end of stream or read error).
    ListenerExited {
        /// Owning connection.
        connection_id: ConnectionId,
        /// Generation of the listener that exited.
        generation: u64,
        /// Why it stopped.
        cause: ExitCause,
    },
}

impl Command {
    /// Builds a `Notify` command.
    pub fn notify(connection_id: ConnectionId, event: EventName, argument: Option<EventArg>) -> Self {
        Self::Notify {
            connection_id,
            event,
            argument,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "Connect",
            Self::Send { .. } => "Send",
            Self::EnableTls { .. } => "EnableTLS",
            Self::Close { .. } => "Close",
            Self::Notify { .. } => "Notify",
            Self::ListenerExited { .. } => "ListenerExited",
        }
    }

    /// Connection the command targets.
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::Connect { connection_id, .. }
            | Self::Send { connection_id, .. }
            | Self::EnableTls { connection_id, .. }
            | Self::Close { connection_id }
            | Self::Notify { connection_id, .. }
            | Self::ListenerExited { connection_id, .. } => connection_id,
        }
    }
}

/// Runs one command on the executor.
pub fn dispatch(exec: &mut Executor, command: Command) {
    match command {
        Command::Connect {
            connection_id,
            host,
            port,
            encoding,
        } => connect::execute(exec, connection_id, host, port, encoding),
        Command::Send {
            connection_id,
            bytes,
        } => send::execute(exec, &connection_id, &bytes),
        Command::EnableTls {
            connection_id,
            trust_policy,
        } => tls::upgrade::execute(exec, connection_id, trust_policy),
        Command::Close { connection_id } => close::execute(exec, &connection_id),
        Command::Notify {
            connection_id,
            event,
            argument,
        } => notify::execute(exec, &connection_id, event, argument.as_ref()),
        Command::ListenerExited {
            connection_id,
            generation,
            cause,
        } => close::listener_exited(exec, &connection_id, generation, &cause),
    }
}
