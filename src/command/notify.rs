//! Notify: deliver one host callback.

use crate::bridge::{EventArg, EventName};
use crate::connection::ConnectionId;
use crate::executor::Executor;
use crate::marshal;

/// Invokes `event` on the host with the marshalled argument.
///
/// `onmessage` for a connection that is no longer OPEN is dropped, so no
/// message can follow `onclose` or a failed TLS upgrade.
pub fn execute(exec: &Executor, id: &ConnectionId, event: EventName, argument: Option<&EventArg>) {
    if event == EventName::Message && !exec.is_open(id) {
        log::debug!("[Executor] Dropping onmessage for closed connection {}", id);
        return;
    }
    let args = marshal::marshal(argument);
    exec.bridge.emit(id, event, &args);
}
