//! Transport-safe encoding of event arguments.
//!
//! Host bridges often re-embed arguments into an evaluated script string,
//! so free text never crosses the boundary raw: it travels as standard
//! base64 of its UTF-8 bytes. Booleans and log-level tokens are already
//! safe and pass through unchanged.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::bridge::EventArg;

/// One argument as it crosses the host bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireArg {
    /// Boolean flag.
    Bool(bool),
    /// Fixed identifier such as a log level (`info`, `warn`, `error`).
    Token(&'static str),
    /// Base64 of UTF-8 text.
    Text(String),
}

impl WireArg {
    /// Encodes free text.
    pub fn text(value: &str) -> Self {
        Self::Text(STANDARD.encode(value.as_bytes()))
    }

    /// Decodes a [`WireArg::Text`] back into a string.
    ///
    /// Returns `None` for other variants or malformed payloads.
    pub fn decode_text(&self) -> Option<String> {
        match self {
            Self::Text(encoded) => STANDARD
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok()),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the token payload, if any.
    pub fn as_token(&self) -> Option<&'static str> {
        match self {
            Self::Token(t) => Some(*t),
            _ => None,
        }
    }
}

/// Marshals an optional event argument into wire arguments.
///
/// An absent argument yields an empty list, so the host callback is
/// invoked with no arguments.
pub fn marshal(argument: Option<&EventArg>) -> Vec<WireArg> {
    match argument {
        None => Vec::new(),
        Some(EventArg::Flag(b)) => vec![WireArg::Bool(*b)],
        Some(EventArg::Text(text)) => vec![WireArg::text(text)],
        Some(EventArg::Log { level, message }) => {
            vec![WireArg::Token(level.as_str()), WireArg::text(message)]
        }
    }
}
