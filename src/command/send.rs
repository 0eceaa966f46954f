//! Send: write bytes to an open connection.

use crate::bridge::{Attribute, LogLevel};
use crate::connection::{ConnectionId, ReadyState};
use crate::error::SendError;
use crate::executor::Executor;

/// Writes `bytes` and flushes.
///
/// Failures become an `onlog` error; the connection state is untouched.
pub fn execute(exec: &Executor, id: &ConnectionId, bytes: &[u8]) {
    match write(exec, id, bytes) {
        Ok(()) => log::trace!("[Executor] Sent {} bytes to {}", bytes.len(), id),
        Err(SendError::Io(e)) => {
            exec.host_log(
                id,
                LogLevel::Error,
                format!("Failed to send content, error found was: {e}"),
            );
        }
        Err(SendError::NotOpen | SendError::UnknownConnection) => {
            let state = exec
                .bridge
                .get_attribute(id, Attribute::ReadyState)
                .and_then(|v| v.as_int())
                .unwrap_or(ReadyState::Closed.code());
            exec.host_log(
                id,
                LogLevel::Error,
                format!("Unable to send content, socket readyState is: {state}"),
            );
        }
    }
}

fn write(exec: &Executor, id: &ConnectionId, bytes: &[u8]) -> Result<(), SendError> {
    let conn = exec
        .connections
        .get(id)
        .ok_or(SendError::UnknownConnection)?;
    if !conn.is_open() {
        return Err(SendError::NotOpen);
    }
    conn.transport().lock().write_all(bytes)?;
    Ok(())
}
