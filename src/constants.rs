//! Application-wide constants.
//!
//! Wire-visible names and codes shared with the host bridge live here so
//! the host side and the executor agree on one spelling.

// Rust guideline compliant 2026-02

/// Default listener read buffer size in bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default listener read timeout in milliseconds.
///
/// Bounds how long a listener can go without observing its cancellation
/// flag, and how long a writer waits for the transport lock.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 20;

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default TLS handshake timeout in milliseconds (0 disables it).
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 30_000;

/// Default time the executor waits for a certificate decision.
pub const DEFAULT_CERT_PROMPT_TIMEOUT_MS: u64 = 60_000;

/// Default connection text encoding label.
pub const DEFAULT_ENCODING: &str = "UTF-8";

/// Upper bound on a single fairness-gate wait, in milliseconds.
///
/// The gate is a scheduling courtesy; the executor never waits longer
/// than this for submitters to leave.
pub const FAIRNESS_WAIT_MS: u64 = 50;

/// `readyState` attribute codes.
pub mod ready_state {
    /// Socket is being established.
    pub const CONNECTING: i64 = 0;
    /// Socket is open and a listener is running.
    pub const OPEN: i64 = 1;
    /// Socket is closed; the connection is terminal.
    pub const CLOSED: i64 = 2;
}

/// `certTrustPolicy` attribute codes.
pub mod trust_policy {
    /// Standard chain validation; failures reject.
    pub const STRICT: i64 = 1;
    /// Ask the host on validation failure.
    pub const INTERACTIVE: i64 = 2;
    /// Accept every chain.
    pub const PERMISSIVE: i64 = 3;
}

/// Host callback names.
pub mod events {
    /// Connect finished (success or failure, see `readyState`).
    pub const ON_OPEN: &str = "onopen";
    /// Decoded chunk read from the socket.
    pub const ON_MESSAGE: &str = "onmessage";
    /// Connection closed.
    pub const ON_CLOSE: &str = "onclose";
    /// TLS upgrade finished.
    pub const ON_TLS: &str = "ontls";
    /// Diagnostic record.
    pub const ON_LOG: &str = "onlog";
    /// Certificate needs a host decision.
    pub const ON_CERT_ERROR: &str = "oncerterror";
}

/// Per-connection attribute names.
pub mod attributes {
    /// Lifecycle flag, see [`super::ready_state`].
    pub const READY_STATE: &str = "readyState";
    /// Target host.
    pub const HOST: &str = "host";
    /// Target port.
    pub const PORT: &str = "port";
    /// Text encoding label.
    pub const ENCODING: &str = "encoding";
    /// Trust policy code, see [`super::trust_policy`].
    pub const CERT_TRUST_POLICY: &str = "certTrustPolicy";
    /// Human-readable connect failure reason.
    pub const REASON: &str = "reason";
}
