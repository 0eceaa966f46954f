//! Lua scripting host.
//!
//! The reference host for the socket bridge. Scripts run on one thread
//! and drive sockets through the `tcp` primitive; the executor runs on
//! its own thread and reaches back only through [`LuaBridge`].
//!
//! # Architecture
//!
//! ```text
//! ScriptRuntime (script thread)
//!  ├── Lua state (mlua)
//!  │    └── Primitives: log, tcp
//!  ├── Connector ──── commands ────▶ Executor (executor thread)
//!  └── pump() ◀────── ScriptEvent ── LuaBridge
//! ```

pub mod bridge;
pub mod primitives;
pub mod runtime;

pub use bridge::{LuaBridge, ScriptEvent};
pub use runtime::{RunOutcome, ScriptRuntime};
