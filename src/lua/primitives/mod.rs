//! Lua primitive functions exposed to scripts.
//!
//! # Available Primitives
//!
//! - `log` - Logging functions (info, warn, error, debug)
//! - `tcp` - Raw TCP sockets with STARTTLS-style upgrade (connect, send,
//!   enable_tls, close, ready_state, attribute)
//!
//! # Adding New Primitives
//!
//! 1. Create a new module (e.g., `foo.rs`)
//! 2. Implement a `register(lua: &Lua, ...) -> Result<()>` function
//! 3. Add `pub mod foo;` here
//! 4. Call `foo::register(lua, ...)?;` in `register_all`

pub mod log;
pub mod tcp;

use std::sync::Arc;

use anyhow::Result;
use mlua::Lua;

use crate::connector::Connector;

pub use tcp::{new_tcp_registry, TcpRegistry, TcpRegistryInner};

/// Register all primitives with the Lua state.
///
/// # Errors
///
/// Returns an error if any primitive fails to register.
pub fn register_all(lua: &Lua, registry: &TcpRegistry, connector: &Arc<Connector>) -> Result<()> {
    log::register(lua)?;
    tcp::register(lua, Arc::clone(registry), Arc::clone(connector))?;

    ::log::debug!("All Lua primitives registered");
    Ok(())
}
