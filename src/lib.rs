//! Sockbridge - raw TCP/TLS sockets for untrusted scripts.
//!
//! Scripts never own a socket. They submit commands to a single
//! privileged executor thread, which performs every socket operation and
//! reports back through a host bridge, one event at a time, in order.
//!
//! # Architecture
//!
//! ```text
//! Script ─▶ Connector ─▶ CommandQueue ─▶ Executor ─▶ HostBridge ─▶ Script
//!                             ▲             │
//!                             │             ├── Connection (TCP / TLS)
//!                             └── Listener ◀┘   one reader thread each
//! ```
//!
//! # Modules
//!
//! - [`executor`] - Command queue and the executor thread
//! - [`command`] - Connect, Send, EnableTls, Close, Notify handlers
//! - [`connection`] - Connection records, transports, listener threads
//! - [`tls`] - In-place TLS upgrade and certificate trust policies
//! - [`bridge`] - Host bridge trait and in-memory implementation
//! - [`connector`] - Submitter-side API
//! - [`lua`] - Lua host (`tcp` and `log` primitives)
//! - [`config`] - Configuration loading

// Library modules
pub mod bridge;
pub mod command;
pub mod connection;
pub mod connector;
pub mod executor;
pub mod lua;
pub mod tls;

pub mod config;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod marshal;

// Re-export commonly used types
pub use bridge::{
    Attribute, AttributeValue, EventArg, EventName, HostBridge, LogLevel, MemoryBridge,
};
pub use command::Command;
pub use config::Config;
pub use connection::{ConnectionId, ReadyState};
pub use connector::Connector;
pub use executor::{Executor, ExecutorHandle, Submitter};
pub use lua::{RunOutcome, ScriptRuntime};
pub use tls::{TlsSettings, TrustPolicy};
