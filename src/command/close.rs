//! Close and listener-exit handling.
//!
//! Both paths end in the same CLOSED transition: the connection leaves
//! the registry, its listener is joined, the socket is released, and
//! `onclose` is queued exactly once.

use crate::bridge::{EventName, LogLevel};
use crate::connection::{ConnectionId, ExitCause};
use crate::executor::Executor;

/// Explicit close requested by the host.
pub fn execute(exec: &mut Executor, id: &ConnectionId) {
    let Some(mut conn) = exec.connections.remove(id) else {
        exec.host_log(id, LogLevel::Warn, "Connection already closed");
        return;
    };

    conn.shutdown();
    exec.mark_closed(id);
    exec.notify(id, EventName::Close, None);
    log::info!("[Executor] Closed {} on request", id);
}

/// A listener stopped on its own.
///
/// A report from a listener generation that has since been replaced, or
/// for a connection that is already gone, is ignored.
pub fn listener_exited(exec: &mut Executor, id: &ConnectionId, generation: u64, cause: &ExitCause) {
    let current = exec.connections.get(id).map(|c| c.generation());
    if current != Some(generation) {
        log::debug!(
            "[Executor] Ignoring stale exit of {} generation {} (current {:?})",
            id,
            generation,
            current
        );
        return;
    }

    if let Some(mut conn) = exec.connections.remove(id) {
        conn.shutdown();
    }
    exec.mark_closed(id);
    if let ExitCause::ReadError(e) = cause {
        exec.host_log(id, LogLevel::Warn, format!("Socket read failed: {e}"));
    }
    exec.notify(id, EventName::Close, None);
    log::info!("[Executor] {} closed by peer ({})", id, cause);
}
