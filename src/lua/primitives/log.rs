//! Logging primitive for Lua scripts.
//!
//! Exposes the `log` facade to scripts as a `log` table. Messages use the
//! `script` target, so `RUST_LOG=script=debug` filters them separately
//! from the bridge's own diagnostics.
//!
//! ```lua
//! log.info("connected to " .. host)
//! log.debug("got " .. #text .. " chars")
//! ```

use anyhow::{anyhow, Result};
use mlua::Lua;

/// Register the `log` table with `info`, `warn`, `error`, `debug`.
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    let levels = [
        ("info", log::Level::Info),
        ("warn", log::Level::Warn),
        ("error", log::Level::Error),
        ("debug", log::Level::Debug),
    ];
    for (name, level) in levels {
        let func = lua
            .create_function(move |_, msg: String| {
                log::log!(target: "script", level, "{}", msg);
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        log_table
            .set(name, func)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}
