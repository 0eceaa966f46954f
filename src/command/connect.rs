//! Connect: open a TCP connection and start its listener.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use crate::bridge::{Attribute, AttributeValue, EventArg, EventName, LogLevel};
use crate::config::Config;
use crate::connection::{Connection, ConnectionId, ReadyState, Transport};
use crate::encoding::TextEncoding;
use crate::error::ConnectError;
use crate::executor::Executor;

/// Establishes the socket and starts the listener.
///
/// `onopen` is emitted right here on the executor, with `readyState`
/// already final: OPEN on success, CLOSED with a `reason` on failure.
/// Commands queued behind this one (a close, a listener exit) run only
/// after the host has seen that state. The listener only queues its
/// results, so every `onmessage` follows `onopen`.
///
/// An id that is live, or that has ever reached CLOSED, is refused with
/// an `onlog` error and no `onopen`.
pub fn execute(
    exec: &mut Executor,
    id: ConnectionId,
    host: String,
    port: u16,
    encoding: TextEncoding,
) {
    if exec.connections.contains_key(&id) {
        exec.host_log(
            &id,
            LogLevel::Error,
            format!("Connection {id} is already open; ignoring connect"),
        );
        return;
    }
    if exec.is_terminal(&id) {
        exec.host_log(
            &id,
            LogLevel::Error,
            format!("Connection {id} is closed and cannot be reused; ignoring connect"),
        );
        return;
    }

    log::info!("[Connect] {} -> {}:{} ({})", id, host, port, encoding);

    let stream = match open_stream(&exec.config, &host, port) {
        Ok(stream) => stream,
        Err(e) => {
            fail(exec, &id, &e);
            return;
        }
    };

    let mut conn = Connection::new(id.clone(), host, port, encoding, Transport::Plain(stream));
    if let Err(e) = exec.start_listener(&mut conn) {
        conn.shutdown();
        let err = ConnectError::Other(format!("Failed to start socket listener: {e}"));
        fail(exec, &id, &err);
        return;
    }

    exec.connections.insert(id.clone(), conn);
    exec.set_ready_state(&id, ReadyState::Open);
    exec.emit(&id, EventName::Open, None);
}

fn fail(exec: &mut Executor, id: &ConnectionId, err: &ConnectError) {
    let reason = err.reason();
    log::warn!("[Connect] {} failed ({}): {}", id, err.kind(), reason);
    exec.bridge
        .set_attribute(id, Attribute::Reason, AttributeValue::Text(reason.clone()));
    exec.mark_closed(id);
    exec.emit(id, EventName::Log, Some(EventArg::log(LogLevel::Error, reason)));
    exec.emit(id, EventName::Open, None);
}

/// Resolves, checks policy, and connects with the configured timeouts.
pub fn open_stream(config: &Config, host: &str, port: u16) -> Result<TcpStream, ConnectError> {
    config
        .policy
        .check(host, port)
        .map_err(|detail| ConnectError::Denied {
            host: host.to_string(),
            port,
            detail,
        })?;

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConnectError::Resolve {
            host: host.to_string(),
            detail: e.to_string(),
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectError::Resolve {
            host: host.to_string(),
            detail: "no addresses found".to_string(),
        });
    }

    let mut last_error = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, config.connect_timeout()) {
            Ok(stream) => {
                return configure(stream, config).map_err(|source| ConnectError::Io {
                    host: host.to_string(),
                    port,
                    source,
                });
            }
            Err(e) => {
                log::debug!("[Connect] {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    let source = last_error
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address connected"));
    if source.kind() == io::ErrorKind::PermissionDenied {
        Err(ConnectError::Denied {
            host: host.to_string(),
            port,
            detail: source.to_string(),
        })
    } else {
        Err(ConnectError::Io {
            host: host.to_string(),
            port,
            source,
        })
    }
}

fn configure(stream: TcpStream, config: &Config) -> io::Result<TcpStream> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.read_timeout()))?;
    Ok(stream)
}
