//! Raw TCP/TLS socket primitives for Lua scripts.
//!
//! Scripts never touch sockets. Every call here goes through the
//! [`Connector`], which queues a command for the executor; results come
//! back later as callbacks fired by the script runtime.
//!
//! # Lua API
//!
//! ```lua
//! local id = tcp.connect("mail.example.com", 25, {
//!     encoding = "UTF-8",
//!     trust_policy = "interactive",
//!     on_open = function(ready_state)
//!         if ready_state ~= 1 then
//!             log.error("connect failed: " .. tcp.attribute(id, "reason"))
//!         end
//!     end,
//!     on_message = function(text) log.info(text) end,
//!     on_close = function() log.info("closed") end,
//!     on_tls = function(ok) log.info("tls: " .. tostring(ok)) end,
//!     on_log = function(level, msg) log.warn(level .. ": " .. msg) end,
//!     on_cert_error = function(subject, issuer, text) return false end,
//! })
//!
//! tcp.send(id, "EHLO example.com\r\n")
//! tcp.enable_tls(id)
//! tcp.close(id)
//! ```
//!
//! # Deadlock Prevention
//!
//! Callback functions are resolved under the registry lock, then the lock
//! is released before Lua runs, so callbacks may call back into `tcp`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use mlua::{Function, Lua, RegistryKey, Table, Value};

use crate::bridge::{Attribute, AttributeValue, EventName};
use crate::connection::{ConnectionId, ReadyState};
use crate::connector::Connector;
use crate::lua::bridge::ScriptEvent;
use crate::marshal::WireArg;
use crate::tls::TrustPolicy;

/// Callback option names and the events they handle.
const CALLBACKS: [(&str, EventName); 6] = [
    ("on_open", EventName::Open),
    ("on_message", EventName::Message),
    ("on_close", EventName::Close),
    ("on_tls", EventName::Tls),
    ("on_log", EventName::Log),
    ("on_cert_error", EventName::CertError),
];

// =============================================================================
// Registry types
// =============================================================================

/// Callbacks of one script-side connection.
#[derive(Debug, Default)]
pub(crate) struct TcpCallbacks {
    keys: HashMap<EventName, RegistryKey>,
    /// Set once a terminal event (close, failed open, failed TLS) fired.
    terminal: bool,
}

/// Inner state of the tcp registry, protected by a mutex.
#[derive(Debug, Default)]
pub struct TcpRegistryInner {
    connections: HashMap<ConnectionId, TcpCallbacks>,
}

impl TcpRegistryInner {
    /// Connections created by the script.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections that have not reached a terminal event yet.
    pub fn live_count(&self) -> usize {
        self.connections.values().filter(|c| !c.terminal).count()
    }
}

/// Thread-safe handle to the tcp registry.
pub type TcpRegistry = Arc<Mutex<TcpRegistryInner>>;

/// Create a new shared tcp registry.
pub fn new_tcp_registry() -> TcpRegistry {
    Arc::new(Mutex::new(TcpRegistryInner::default()))
}

// =============================================================================
// Event dispatch
// =============================================================================

/// Fires the Lua callback for one forwarded event.
///
/// Callback errors are logged and swallowed; a failing callback must not
/// stop the pump. A failed certificate callback answers "reject".
pub(crate) fn fire_event(lua: &Lua, registry: &TcpRegistry, connector: &Connector, event: ScriptEvent) {
    match event {
        ScriptEvent::Emit {
            connection,
            event,
            args,
            ready_state,
        } => {
            // Prefer the state captured at emit time; the attribute may
            // already reflect commands that ran after this event.
            let state = ready_state
                .and_then(ReadyState::from_code)
                .or_else(|| connector.ready_state(&connection))
                .unwrap_or(ReadyState::Closed);
            if let Err(e) = fire_emit(lua, registry, &connection, event, &args, state) {
                log::warn!("[tcp] {} callback error for {}: {e}", event, connection);
            }
            if is_terminal(event, &args, state) {
                if let Some(conn) = registry
                    .lock()
                    .expect("TcpRegistry mutex poisoned")
                    .connections
                    .get_mut(&connection)
                {
                    conn.terminal = true;
                }
            }
        }
        ScriptEvent::CertPrompt {
            connection,
            prompt,
            reply,
        } => {
            let decision = lookup(lua, registry, &connection, EventName::CertError)
                .and_then(|callback| match callback {
                    Some(f) => f.call::<Option<bool>>((
                        prompt.subject.as_str(),
                        prompt.issuer.as_str(),
                        prompt.description.as_str(),
                    )),
                    None => Ok(None),
                })
                .unwrap_or_else(|e| {
                    log::warn!("[tcp] on_cert_error failed for {}: {e}", connection);
                    None
                })
                .unwrap_or(false);
            let _ = reply.send(decision);
        }
    }
}

fn lookup(
    lua: &Lua,
    registry: &TcpRegistry,
    connection: &ConnectionId,
    event: EventName,
) -> mlua::Result<Option<Function>> {
    let inner = registry.lock().expect("TcpRegistry mutex poisoned");
    inner
        .connections
        .get(connection)
        .and_then(|c| c.keys.get(&event))
        .map(|key| lua.registry_value::<Function>(key))
        .transpose()
}

fn fire_emit(
    lua: &Lua,
    registry: &TcpRegistry,
    connection: &ConnectionId,
    event: EventName,
    args: &[WireArg],
    state: ReadyState,
) -> mlua::Result<()> {
    let Some(callback) = lookup(lua, registry, connection, event)? else {
        return Ok(());
    };
    let text = || args.iter().find_map(WireArg::decode_text).unwrap_or_default();

    match event {
        EventName::Open => callback.call::<()>(state.code()),
        EventName::Message => callback.call::<()>(text()),
        EventName::Close => callback.call::<()>(()),
        EventName::Tls => {
            let ok = args.iter().find_map(WireArg::as_bool).unwrap_or(false);
            callback.call::<()>(ok)
        }
        EventName::Log => {
            let level = args.iter().find_map(WireArg::as_token).unwrap_or("info");
            callback.call::<()>((level, text()))
        }
        EventName::CertError => Ok(()),
    }
}

fn is_terminal(event: EventName, args: &[WireArg], state: ReadyState) -> bool {
    let closed = state == ReadyState::Closed;
    match event {
        EventName::Close => true,
        EventName::Open => closed,
        EventName::Tls => closed && args.iter().find_map(WireArg::as_bool) == Some(false),
        _ => false,
    }
}

// =============================================================================
// Lua registration
// =============================================================================

fn attribute_to_lua(lua: &Lua, value: AttributeValue) -> mlua::Result<Value> {
    Ok(match value {
        AttributeValue::Int(i) => Value::Integer(i),
        AttributeValue::Bool(b) => Value::Boolean(b),
        AttributeValue::Text(s) => Value::String(lua.create_string(&s)?),
    })
}

fn policy_from_lua(value: &Value) -> std::result::Result<Option<TrustPolicy>, String> {
    match value {
        Value::Nil => Ok(None),
        Value::Integer(code) => TrustPolicy::from_code(*code)
            .map(Some)
            .ok_or_else(|| format!("unknown trust policy code {code}")),
        Value::String(s) => s.to_string_lossy().parse().map(Some),
        other => Err(format!("trust policy must be a string or code, got {}", other.type_name())),
    }
}

/// Register the `tcp` global table.
///
/// Creates a global `tcp` table with methods:
/// - `tcp.connect(host, port, opts)` - `(id, nil)` or `(nil, error)`
/// - `tcp.send(id, text)` - `true` if queued
/// - `tcp.enable_tls(id[, policy])` - `(true, nil)` or `(nil, error)`
/// - `tcp.close(id)` - `true` if queued
/// - `tcp.ready_state(id)` - `0`/`1`/`2` or `nil`
/// - `tcp.attribute(id, name)` - attribute value or `nil`
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua, registry: TcpRegistry, connector: Arc<Connector>) -> Result<()> {
    let tcp_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create tcp table: {e}"))?;

    // tcp.connect(host, port, opts) -> id or (nil, error)
    let connect_registry = Arc::clone(&registry);
    let connect_connector = Arc::clone(&connector);
    let connect_fn = lua
        .create_function(move |lua, (host, port, opts): (String, u16, Option<Table>)| {
            let mut callbacks = TcpCallbacks::default();
            let mut encoding: Option<String> = None;
            let mut policy = None;

            if let Some(ref opts) = opts {
                encoding = opts.get::<Option<String>>("encoding")?;
                match policy_from_lua(&opts.get::<Value>("trust_policy")?) {
                    Ok(p) => policy = p,
                    Err(e) => return Ok((Value::Nil, Some(e))),
                }
                for (name, event) in CALLBACKS {
                    if let Some(f) = opts.get::<Option<Function>>(name)? {
                        let key = lua.create_registry_value(f).map_err(|e| {
                            mlua::Error::external(format!("tcp.connect: failed to store {name}: {e}"))
                        })?;
                        callbacks.keys.insert(event, key);
                    }
                }
            }

            let id = connect_connector.next_connection_id();
            // Register callbacks before queueing so the first event finds them.
            connect_registry
                .lock()
                .expect("TcpRegistry mutex poisoned")
                .connections
                .insert(id.clone(), callbacks);

            if let Some(policy) = policy {
                connect_connector.set_trust_policy(&id, policy);
            }
            if let Err(e) = connect_connector.connect(&id, &host, port, encoding.as_deref()) {
                connect_registry
                    .lock()
                    .expect("TcpRegistry mutex poisoned")
                    .connections
                    .remove(&id);
                return Ok((Value::Nil, Some(e.to_string())));
            }

            Ok((Value::String(lua.create_string(id.as_str())?), None::<String>))
        })
        .map_err(|e| anyhow!("Failed to create tcp.connect function: {e}"))?;
    tcp_table
        .set("connect", connect_fn)
        .map_err(|e| anyhow!("Failed to set tcp.connect: {e}"))?;

    // tcp.send(id, text) -> bool
    let send_connector = Arc::clone(&connector);
    let send_fn = lua
        .create_function(move |_, (id, text): (String, mlua::String)| {
            Ok(send_connector.send(&ConnectionId::new(id), &text.to_string_lossy()))
        })
        .map_err(|e| anyhow!("Failed to create tcp.send function: {e}"))?;
    tcp_table
        .set("send", send_fn)
        .map_err(|e| anyhow!("Failed to set tcp.send: {e}"))?;

    // tcp.enable_tls(id[, policy]) -> true or (nil, error)
    let tls_connector = Arc::clone(&connector);
    let tls_fn = lua
        .create_function(move |_, (id, policy): (String, Value)| {
            let id = ConnectionId::new(id);
            let queued = match policy_from_lua(&policy) {
                Ok(Some(policy)) => tls_connector.enable_tls_with(&id, policy),
                Ok(None) => tls_connector.enable_tls(&id),
                Err(e) => return Ok((Value::Nil, Some(e))),
            };
            Ok((Value::Boolean(queued), None::<String>))
        })
        .map_err(|e| anyhow!("Failed to create tcp.enable_tls function: {e}"))?;
    tcp_table
        .set("enable_tls", tls_fn)
        .map_err(|e| anyhow!("Failed to set tcp.enable_tls: {e}"))?;

    // tcp.close(id) -> bool
    let close_connector = Arc::clone(&connector);
    let close_fn = lua
        .create_function(move |_, id: String| Ok(close_connector.close(&ConnectionId::new(id))))
        .map_err(|e| anyhow!("Failed to create tcp.close function: {e}"))?;
    tcp_table
        .set("close", close_fn)
        .map_err(|e| anyhow!("Failed to set tcp.close: {e}"))?;

    // tcp.ready_state(id) -> integer or nil
    let state_connector = Arc::clone(&connector);
    let state_fn = lua
        .create_function(move |_, id: String| {
            Ok(state_connector
                .ready_state(&ConnectionId::new(id))
                .map(ReadyState::code))
        })
        .map_err(|e| anyhow!("Failed to create tcp.ready_state function: {e}"))?;
    tcp_table
        .set("ready_state", state_fn)
        .map_err(|e| anyhow!("Failed to set tcp.ready_state: {e}"))?;

    // tcp.attribute(id, name) -> value or nil
    let attr_connector = connector;
    let attr_fn = lua
        .create_function(move |lua, (id, name): (String, String)| {
            let Some(attribute) = Attribute::from_name(&name) else {
                return Err(mlua::Error::external(format!("unknown attribute '{name}'")));
            };
            match attr_connector.attribute(&ConnectionId::new(id), attribute) {
                Some(value) => attribute_to_lua(lua, value),
                None => Ok(Value::Nil),
            }
        })
        .map_err(|e| anyhow!("Failed to create tcp.attribute function: {e}"))?;
    tcp_table
        .set("attribute", attr_fn)
        .map_err(|e| anyhow!("Failed to set tcp.attribute: {e}"))?;

    lua.globals()
        .set("tcp", tcp_table)
        .map_err(|e| anyhow!("Failed to register tcp table globally: {e}"))?;

    Ok(())
}
