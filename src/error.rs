//! Error types for socket bridge operations.
//!
//! Every variant ends up either as a host-visible event (via the executor)
//! or as an `anyhow` context in the binary. None of them crosses the
//! executor loop boundary.

use std::io;

use thiserror::Error;

/// Failure while establishing a connection.
///
/// The variant is the classification reported to the host; the
/// [`reason`](ConnectError::reason) string lands in the `reason` attribute.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Host name could not be resolved to any address.
    #[error("Unknown host {host}: {detail}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Resolver message.
        detail: String,
    },
    /// Socket-level failure (refused, unreachable, timed out).
    #[error("Could not connect to {host} on port {port}: {source}")]
    Io {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Refused by connect policy or OS permission.
    #[error("Connection to {host}:{port} denied: {detail}")]
    Denied {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Why the connection was refused.
        detail: String,
    },
    /// Anything else (listener spawn failure).
    #[error("{0}")]
    Other(String),
}

impl ConnectError {
    /// Host-visible reason string.
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Short classification label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolve { .. } => "resolve",
            Self::Io { .. } => "io",
            Self::Denied { .. } => "denied",
            Self::Other(_) => "other",
        }
    }
}

/// Failure while writing to a connection.
#[derive(Debug, Error)]
pub enum SendError {
    /// No connection with this id is registered.
    #[error("unknown connection")]
    UnknownConnection,
    /// Connection exists but is not OPEN.
    #[error("connection is not open")]
    NotOpen,
    /// Write or flush failed.
    #[error("Failed to send content, error found was: {0}")]
    Io(#[from] io::Error),
}

/// Failure during a TLS upgrade.
#[derive(Debug, Error)]
pub enum TlsError {
    /// No open connection to upgrade.
    #[error("connection is not open")]
    NotOpen,
    /// Peer closed the stream before the upgrade could start.
    #[error("connection was closed by the peer")]
    PeerClosed,
    /// Transport is already TLS; there is no downgrade or re-upgrade.
    #[error("TLS is already active on this connection")]
    AlreadyActive,
    /// Trust verifier rejected the presented chain.
    #[error("Server certificate error, error was: {0}")]
    Certificate(String),
    /// Handshake I/O or protocol failure.
    #[error("Failed to finish TLS handshake, error found was: {0}")]
    Handshake(String),
    /// Client context could not be built.
    #[error("Failed to prepare TLS context: {0}")]
    Config(String),
    /// Listener could not be restarted on the upgraded socket.
    #[error("TLS handshake process failure, failed to start socket listener after handshake: {0}")]
    Listener(String),
}

impl TlsError {
    /// Whether the failure came from certificate policy rather than I/O.
    pub fn is_certificate(&self) -> bool {
        matches!(self, Self::Certificate(_))
    }
}

/// Unknown or unsupported encoding label.
#[derive(Debug, Error)]
#[error("unsupported encoding label: {0}")]
pub struct EncodingError(pub String);

/// Failure loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or written.
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),
    /// File content is not valid JSON for [`crate::config::Config`].
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_reason_is_non_empty() {
        let err = ConnectError::Io {
            host: "127.0.0.1".to_string(),
            port: 1,
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(!err.reason().is_empty());
        assert!(err.reason().contains("127.0.0.1"));
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_tls_error_certificate_classification() {
        assert!(TlsError::Certificate("bad".into()).is_certificate());
        assert!(!TlsError::Handshake("eof".into()).is_certificate());
    }

    #[test]
    fn test_send_error_from_io() {
        let err: SendError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(err.to_string().starts_with("Failed to send content"));
    }
}
