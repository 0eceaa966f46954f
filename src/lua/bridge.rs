//! [`HostBridge`] backed by a Lua script thread.
//!
//! The Lua state lives on the script thread and cannot be touched from
//! the executor. Events are forwarded over a channel and fired by
//! [`super::ScriptRuntime`] when it pumps. Certificate prompts carry a
//! reply channel; the executor blocks on it until the script answers or
//! the prompt times out.
//!
//! Callbacks fire later than the executor emitted them, so each event
//! carries the `readyState` of that moment; the attribute itself may have
//! moved on by the time the script sees the event.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{Attribute, AttributeStore, AttributeValue, CertificatePrompt, EventName, HostBridge};
use crate::connection::ConnectionId;
use crate::marshal::WireArg;

/// Work forwarded to the script thread.
#[derive(Debug)]
pub enum ScriptEvent {
    /// Fire a connection callback.
    Emit {
        /// Target connection.
        connection: ConnectionId,
        /// Callback.
        event: EventName,
        /// Marshalled arguments.
        args: Vec<WireArg>,
        /// `readyState` when the executor emitted the event.
        ready_state: Option<i64>,
    },
    /// Ask `on_cert_error` for a verdict.
    CertPrompt {
        /// Target connection.
        connection: ConnectionId,
        /// Certificate details.
        prompt: CertificatePrompt,
        /// Where the verdict goes.
        reply: std_mpsc::SyncSender<bool>,
    },
}

/// Channel-forwarding host bridge.
#[derive(Debug)]
pub struct LuaBridge {
    attributes: Arc<AttributeStore>,
    events_tx: std_mpsc::Sender<ScriptEvent>,
    prompt_timeout: Duration,
}

impl LuaBridge {
    /// Creates the bridge and the receiver the script thread pumps.
    pub fn channel(
        attributes: Arc<AttributeStore>,
        prompt_timeout: Duration,
    ) -> (Self, std_mpsc::Receiver<ScriptEvent>) {
        let (events_tx, events_rx) = std_mpsc::channel();
        (
            Self {
                attributes,
                events_tx,
                prompt_timeout,
            },
            events_rx,
        )
    }
}

impl HostBridge for LuaBridge {
    fn emit(&self, connection: &ConnectionId, event: EventName, args: &[WireArg]) {
        let ready_state = self
            .attributes
            .get(connection, Attribute::ReadyState)
            .and_then(|v| v.as_int());
        let sent = self.events_tx.send(ScriptEvent::Emit {
            connection: connection.clone(),
            event,
            args: args.to_vec(),
            ready_state,
        });
        if sent.is_err() {
            log::debug!("[LuaBridge] Script gone, dropping {} for {}", event, connection);
        }
    }

    fn get_attribute(&self, connection: &ConnectionId, attribute: Attribute) -> Option<AttributeValue> {
        self.attributes.get(connection, attribute)
    }

    fn set_attribute(&self, connection: &ConnectionId, attribute: Attribute, value: AttributeValue) {
        self.attributes.set(connection, attribute, value);
    }

    fn prompt_certificate_decision(
        &self,
        connection: &ConnectionId,
        prompt: &CertificatePrompt,
    ) -> Option<bool> {
        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        let request = ScriptEvent::CertPrompt {
            connection: connection.clone(),
            prompt: prompt.clone(),
            reply: reply_tx,
        };
        if self.events_tx.send(request).is_err() {
            log::warn!("[LuaBridge] Script gone, no certificate verdict for {}", connection);
            return None;
        }
        match reply_rx.recv_timeout(self.prompt_timeout) {
            Ok(decision) => Some(decision),
            Err(e) => {
                log::warn!("[LuaBridge] No certificate verdict for {}: {}", connection, e);
                None
            }
        }
    }
}
