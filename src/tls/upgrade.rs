//! EnableTLS: in-place upgrade of an open connection.
//!
//! ```text
//! Plain -> StoppingListener -> Handshaking -> Active
//!                                          \-> Failed
//! ```
//!
//! The old listener is hard-stopped and joined before the handshake, so
//! two listeners never read the same socket. The handshake runs on the
//! executor thread over the same TCP stream, right after whatever
//! plaintext the old listener already consumed.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, StreamOwned};

use super::{TrustPolicy, TrustVerifier, UpgradeState};
use crate::bridge::{EventArg, EventName, LogLevel};
use crate::connection::{Connection, ConnectionId, Transport};
use crate::error::TlsError;
use crate::executor::Executor;

/// Runs an EnableTLS command.
///
/// Emits exactly one `ontls`. Failure on an open connection is terminal:
/// the connection is released and `readyState` becomes CLOSED. Asking for
/// TLS on a connection that already has it fails the request but leaves
/// the connection usable.
///
/// If the peer closed the stream while this command was queued, the
/// listener has already released the transport and its exit report is
/// still behind us in the queue. That case ends as a peer close:
/// `ontls(false)` followed by `onclose`.
pub fn execute(exec: &mut Executor, id: ConnectionId, policy: TrustPolicy) {
    let Some(mut conn) = exec.connections.remove(&id) else {
        exec.host_log(
            &id,
            LogLevel::Error,
            format!("Unable to enable TLS: {}", TlsError::NotOpen),
        );
        exec.notify(&id, EventName::Tls, Some(EventArg::Flag(false)));
        return;
    };

    if conn.upgrade_state() == UpgradeState::Active {
        exec.host_log(
            &id,
            LogLevel::Warn,
            format!("Unable to enable TLS: {}", TlsError::AlreadyActive),
        );
        exec.connections.insert(id.clone(), conn);
        exec.notify(&id, EventName::Tls, Some(EventArg::Flag(false)));
        return;
    }

    log::info!("[Tls] Upgrading {} with {} trust policy", id, policy);

    match upgrade(exec, &mut conn, policy) {
        Ok(()) => {
            conn.set_upgrade_state(UpgradeState::Active);
            exec.connections.insert(id.clone(), conn);
            log::info!("[Tls] {} upgraded", id);
            exec.notify(&id, EventName::Tls, Some(EventArg::Flag(true)));
        }
        Err(TlsError::PeerClosed) => {
            log::info!("[Tls] {} closed by peer before upgrade", id);
            conn.shutdown();
            drop(conn);
            exec.mark_closed(&id);
            exec.host_log(
                &id,
                LogLevel::Warn,
                format!("Unable to enable TLS: {}", TlsError::PeerClosed),
            );
            exec.notify(&id, EventName::Tls, Some(EventArg::Flag(false)));
            exec.notify(&id, EventName::Close, None);
        }
        Err(e) => {
            if e.is_certificate() {
                log::warn!("[Tls] {} certificate rejected: {}", id, e);
            } else {
                log::error!("[Tls] {} upgrade failed: {}", id, e);
            }
            conn.set_upgrade_state(UpgradeState::Failed);
            conn.shutdown();
            drop(conn);
            exec.mark_closed(&id);
            exec.host_log(&id, LogLevel::Error, e.to_string());
            exec.notify(&id, EventName::Tls, Some(EventArg::Flag(false)));
        }
    }
}

fn upgrade(exec: &Executor, conn: &mut Connection, policy: TrustPolicy) -> Result<(), TlsError> {
    conn.set_upgrade_state(UpgradeState::StoppingListener);
    conn.stop_listener();

    // Only a plain transport reaches here; anything else was released by
    // a listener that saw end of stream.
    let stream = conn
        .transport()
        .lock()
        .take_plain()
        .ok_or(TlsError::PeerClosed)?;

    conn.set_upgrade_state(UpgradeState::Handshaking);

    let verifier = TrustVerifier::new(
        policy,
        &exec.tls,
        conn.id().clone(),
        Arc::clone(&exec.bridge),
        exec.submitter.clone(),
    )?;
    let config = exec.tls.client_config(Arc::new(verifier))?;
    let server_name = ServerName::try_from(conn.host().to_string())
        .map_err(|e| TlsError::Config(format!("invalid server name {}: {e}", conn.host())))?;
    let client = ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| TlsError::Config(e.to_string()))?;

    let tls = handshake(client, stream, exec)?;
    *conn.transport().lock() = Transport::Tls(Box::new(tls));

    exec.start_listener(conn)
        .map_err(|e| TlsError::Listener(e.to_string()))
}

fn handshake(
    mut client: ClientConnection,
    mut stream: TcpStream,
    exec: &Executor,
) -> Result<StreamOwned<ClientConnection, TcpStream>, TlsError> {
    stream
        .set_read_timeout(exec.config.handshake_timeout())
        .map_err(|e| TlsError::Handshake(e.to_string()))?;

    while client.is_handshaking() {
        client.complete_io(&mut stream).map_err(classify)?;
    }

    stream
        .set_read_timeout(Some(exec.config.read_timeout()))
        .map_err(|e| TlsError::Handshake(e.to_string()))?;

    Ok(StreamOwned::new(client, stream))
}

/// Separates certificate-policy failures from generic handshake I/O.
fn classify(err: io::Error) -> TlsError {
    let tls_error = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());
    match tls_error {
        Some(rustls::Error::InvalidCertificate(cert_err)) => {
            TlsError::Certificate(format!("{cert_err:?}"))
        }
        _ => TlsError::Handshake(err.to_string()),
    }
}
