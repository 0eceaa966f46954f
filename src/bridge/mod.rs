//! Host bridge interface.
//!
//! The host is the scripting environment that owns per-connection
//! callbacks and attributes. The executor talks to it only through
//! [`HostBridge`], and only from the executor thread.
//!
//! # Implementations
//!
//! - [`MemoryBridge`] records events in memory (tests, embedding)
//! - [`crate::lua::LuaBridge`] forwards to a Lua script thread

// Rust guideline compliant 2026-02

pub mod attributes;
pub mod memory;

pub use attributes::AttributeStore;
pub use memory::{MemoryBridge, RecordedEvent};

use std::fmt;

use crate::connection::ConnectionId;
use crate::constants;
use crate::marshal::WireArg;

// ============================================================================
// Attributes
// ============================================================================

/// Per-connection attribute names exposed by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// `readyState` (0/1/2).
    ReadyState,
    /// Target host.
    Host,
    /// Target port.
    Port,
    /// Encoding label.
    Encoding,
    /// Trust policy code (1/2/3).
    CertTrustPolicy,
    /// Connect failure reason.
    Reason,
}

impl Attribute {
    /// Every attribute, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::ReadyState,
        Self::Host,
        Self::Port,
        Self::Encoding,
        Self::CertTrustPolicy,
        Self::Reason,
    ];

    /// Host-side attribute name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadyState => constants::attributes::READY_STATE,
            Self::Host => constants::attributes::HOST,
            Self::Port => constants::attributes::PORT,
            Self::Encoding => constants::attributes::ENCODING,
            Self::CertTrustPolicy => constants::attributes::CERT_TRUST_POLICY,
            Self::Reason => constants::attributes::REASON,
        }
    }

    /// Parses a host-side attribute name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

/// Attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    /// Integer (readyState, port, certTrustPolicy).
    Int(i64),
    /// Text (host, encoding, reason).
    Text(String),
    /// Boolean.
    Bool(bool),
}

impl AttributeValue {
    /// Integer view. Numeric text is accepted, since hosts often store
    /// attributes as strings.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    /// Text view.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Host callback invoked by the executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    /// `onopen`
    Open,
    /// `onmessage`
    Message,
    /// `onclose`
    Close,
    /// `ontls`
    Tls,
    /// `onlog`
    Log,
    /// `oncerterror`
    CertError,
}

impl EventName {
    /// Host-side callback name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => constants::events::ON_OPEN,
            Self::Message => constants::events::ON_MESSAGE,
            Self::Close => constants::events::ON_CLOSE,
            Self::Tls => constants::events::ON_TLS,
            Self::Log => constants::events::ON_LOG,
            Self::CertError => constants::events::ON_CERT_ERROR,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of an `onlog` record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failed operation.
    Error,
}

impl LogLevel {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Matching `log` facade level.
    pub fn to_log(self) -> log::Level {
        match self {
            Self::Info => log::Level::Info,
            Self::Warn => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// Argument attached to a notification before marshalling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventArg {
    /// Decoded socket text.
    Text(String),
    /// Success flag (`ontls`).
    Flag(bool),
    /// Diagnostic record (`onlog`).
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
}

impl EventArg {
    /// Builds a log argument.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
        }
    }
}

/// Certificate details shown to the host when chain validation fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificatePrompt {
    /// End-entity subject distinguished name.
    pub subject: String,
    /// End-entity issuer distinguished name.
    pub issuer: String,
    /// Multi-line description: serial, validity, fingerprint, error.
    pub description: String,
}

// ============================================================================
// Bridge trait
// ============================================================================

/// The host side of the socket bridge.
///
/// `emit` and `prompt_certificate_decision` are called only from the
/// executor thread, one call at a time. Attributes are also written by
/// the host's own submitter side, so implementations synchronize them.
pub trait HostBridge: Send + Sync {
    /// Invokes `event` on the connection's handle. Fire and forget.
    fn emit(&self, connection: &ConnectionId, event: EventName, args: &[WireArg]);

    /// Reads a per-connection attribute.
    fn get_attribute(&self, connection: &ConnectionId, attribute: Attribute)
        -> Option<AttributeValue>;

    /// Writes a per-connection attribute.
    fn set_attribute(&self, connection: &ConnectionId, attribute: Attribute, value: AttributeValue);

    /// Asks the host whether to trust a certificate that failed validation.
    ///
    /// Blocks until the host answers. `None` means no verdict was obtained
    /// and is treated as a rejection.
    fn prompt_certificate_decision(
        &self,
        connection: &ConnectionId,
        prompt: &CertificatePrompt,
    ) -> Option<bool>;
}
