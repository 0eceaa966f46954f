//! Submitter-side API.
//!
//! [`Connector`] is what script-facing code calls. It records the host's
//! view of each connection in the attribute store and turns requests into
//! queued commands. It never touches a socket; any number of threads may
//! share one connector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bridge::{Attribute, AttributeValue, EventArg, EventName, HostBridge, LogLevel};
use crate::command::Command;
use crate::config::Config;
use crate::connection::{ConnectionId, ReadyState};
use crate::encoding::TextEncoding;
use crate::error::EncodingError;
use crate::executor::Submitter;
use crate::tls::TrustPolicy;

/// Queue-backed handle used by scripts and embedders.
pub struct Connector {
    submitter: Submitter,
    bridge: Arc<dyn HostBridge>,
    config: Arc<Config>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a connector that submits to `submitter` and records
    /// attributes on `bridge`.
    pub fn new(submitter: Submitter, bridge: Arc<dyn HostBridge>, config: Arc<Config>) -> Self {
        Self {
            submitter,
            bridge,
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// Allocates a fresh `tcp_N` connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        ConnectionId::new(format!("tcp_{n}"))
    }

    /// Requests a connection.
    ///
    /// Sets `host`, `port`, `encoding` and `readyState` = CONNECTING, then
    /// queues a Connect. `encoding` defaults to the configured encoding.
    /// An id that already has a `readyState` keeps its attributes; the
    /// executor refuses the Connect and reports it through `onlog`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] for an unknown encoding label; nothing is
    /// queued in that case.
    pub fn connect(
        &self,
        id: &ConnectionId,
        host: &str,
        port: u16,
        encoding: Option<&str>,
    ) -> Result<(), EncodingError> {
        let encoding = TextEncoding::for_label(encoding.unwrap_or(&self.config.default_encoding))?;

        if let Some(state) = self.ready_state(id) {
            log::warn!("[Connector] {} is already known ({:?}); connect will be refused", id, state);
        } else {
            self.bridge
                .set_attribute(id, Attribute::Host, AttributeValue::Text(host.to_string()));
            self.bridge
                .set_attribute(id, Attribute::Port, AttributeValue::Int(i64::from(port)));
            self.bridge.set_attribute(
                id,
                Attribute::Encoding,
                AttributeValue::Text(encoding.name().to_string()),
            );
            self.bridge.set_attribute(
                id,
                Attribute::ReadyState,
                AttributeValue::Int(ReadyState::Connecting.code()),
            );
        }

        self.submitter.push(Command::Connect {
            connection_id: id.clone(),
            host: host.to_string(),
            port,
            encoding,
        });
        Ok(())
    }

    /// Stores the trust policy used by later [`enable_tls`](Self::enable_tls) calls.
    pub fn set_trust_policy(&self, id: &ConnectionId, policy: TrustPolicy) {
        self.bridge.set_attribute(
            id,
            Attribute::CertTrustPolicy,
            AttributeValue::Int(policy.code()),
        );
    }

    /// Host view of `readyState`.
    pub fn ready_state(&self, id: &ConnectionId) -> Option<ReadyState> {
        self.bridge
            .get_attribute(id, Attribute::ReadyState)
            .and_then(|v| v.as_int())
            .and_then(ReadyState::from_code)
    }

    /// Reads any attribute.
    pub fn attribute(&self, id: &ConnectionId, attribute: Attribute) -> Option<AttributeValue> {
        self.bridge.get_attribute(id, attribute)
    }

    /// Queues `text` for sending, encoded with the connection's encoding.
    ///
    /// Returns `false` without queueing a Send when the host's
    /// `readyState` is not OPEN; an `onlog` error is queued instead.
    pub fn send(&self, id: &ConnectionId, text: &str) -> bool {
        let state = self
            .bridge
            .get_attribute(id, Attribute::ReadyState)
            .and_then(|v| v.as_int());
        if state != Some(ReadyState::Open.code()) {
            let shown = state.map_or_else(|| "unknown".to_string(), |s| s.to_string());
            let message = format!("Unable to send content, socket readyState is: {shown}");
            log::warn!("[Connector] {}: {}", id, message);
            self.submitter.push(Command::notify(
                id.clone(),
                EventName::Log,
                Some(EventArg::log(LogLevel::Error, message)),
            ));
            return false;
        }

        let encoding = self
            .bridge
            .get_attribute(id, Attribute::Encoding)
            .and_then(|v| v.as_text().and_then(|label| TextEncoding::for_label(label).ok()))
            .unwrap_or_default();

        self.submitter.push(Command::Send {
            connection_id: id.clone(),
            bytes: encoding.encode(text),
        })
    }

    /// Queues a TLS upgrade with the connection's `certTrustPolicy`, or the
    /// configured default when unset or invalid.
    pub fn enable_tls(&self, id: &ConnectionId) -> bool {
        let policy = self
            .bridge
            .get_attribute(id, Attribute::CertTrustPolicy)
            .and_then(|v| v.as_int())
            .and_then(TrustPolicy::from_code)
            .unwrap_or(self.config.default_trust_policy);
        self.enable_tls_with(id, policy)
    }

    /// Queues a TLS upgrade with an explicit policy.
    pub fn enable_tls_with(&self, id: &ConnectionId, policy: TrustPolicy) -> bool {
        self.submitter.push(Command::EnableTls {
            connection_id: id.clone(),
            trust_policy: policy,
        })
    }

    /// Queues a close.
    pub fn close(&self, id: &ConnectionId) -> bool {
        self.submitter.push(Command::Close {
            connection_id: id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MemoryBridge;
    use crate::executor::{CommandQueue, CommandReceiver};

    fn setup() -> (Connector, Arc<MemoryBridge>, CommandReceiver) {
        let bridge = Arc::new(MemoryBridge::new());
        let (submitter, receiver) = CommandQueue::new(None).split();
        let connector = Connector::new(
            submitter,
            Arc::clone(&bridge) as Arc<dyn HostBridge>,
            Arc::new(Config::default()),
        );
        (connector, bridge, receiver)
    }

    #[test]
    fn test_ids_are_sequential() {
        let (connector, _, _rx) = setup();
        assert_eq!(connector.next_connection_id().as_str(), "tcp_0");
        assert_eq!(connector.next_connection_id().as_str(), "tcp_1");
    }

    #[test]
    fn test_connect_sets_attributes_and_queues() {
        let (connector, bridge, mut rx) = setup();
        let id = ConnectionId::from("tcp_0");
        connector
            .connect(&id, "example.com", 7, Some("latin1"))
            .expect("Should accept encoding");

        let attrs = bridge.attributes();
        assert_eq!(attrs.get(&id, Attribute::ReadyState), Some(AttributeValue::Int(0)));
        assert_eq!(attrs.get(&id, Attribute::Port), Some(AttributeValue::Int(7)));
        assert_eq!(
            attrs.get(&id, Attribute::Encoding),
            Some(AttributeValue::Text("windows-1252".into()))
        );
        assert!(matches!(rx.try_pop(), Some(Command::Connect { port: 7, .. })));
    }

    #[test]
    fn test_connect_keeps_attributes_of_known_id() {
        let (connector, bridge, mut rx) = setup();
        let id = ConnectionId::from("tcp_0");
        bridge.set_attribute(&id, Attribute::ReadyState, AttributeValue::Int(2));
        bridge.set_attribute(&id, Attribute::Port, AttributeValue::Int(25));

        connector
            .connect(&id, "example.com", 7, None)
            .expect("Should accept encoding");

        let attrs = bridge.attributes();
        assert_eq!(attrs.get(&id, Attribute::ReadyState), Some(AttributeValue::Int(2)));
        assert_eq!(attrs.get(&id, Attribute::Port), Some(AttributeValue::Int(25)));
        assert!(matches!(rx.try_pop(), Some(Command::Connect { port: 7, .. })));
    }

    #[test]
    fn test_connect_rejects_unknown_encoding() {
        let (connector, _, mut rx) = setup();
        let id = ConnectionId::from("tcp_0");
        assert!(connector.connect(&id, "h", 1, Some("klingon")).is_err());
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn test_send_refused_when_not_open() {
        let (connector, _, mut rx) = setup();
        let id = ConnectionId::from("tcp_0");
        connector.connect(&id, "h", 1, None).expect("Should connect");
        let _ = rx.try_pop();

        assert!(!connector.send(&id, "ping"));
        match rx.try_pop() {
            Some(Command::Notify {
                event: EventName::Log,
                argument: Some(EventArg::Log { level, message }),
                ..
            }) => {
                assert_eq!(level, LogLevel::Error);
                assert_eq!(message, "Unable to send content, socket readyState is: 0");
            }
            other => panic!("expected onlog notify, got {other:?}"),
        }
    }

    #[test]
    fn test_send_encodes_with_connection_encoding() {
        let (connector, bridge, mut rx) = setup();
        let id = ConnectionId::from("tcp_0");
        bridge.set_attribute(&id, Attribute::ReadyState, AttributeValue::Int(1));
        bridge.set_attribute(&id, Attribute::Encoding, AttributeValue::Text("UTF-16BE".into()));

        assert!(connector.send(&id, "hi"));
        match rx.try_pop() {
            Some(Command::Send { bytes, .. }) => assert_eq!(bytes, vec![0, b'h', 0, b'i']),
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn test_enable_tls_uses_attribute_then_default() {
        let (connector, _, mut rx) = setup();
        let id = ConnectionId::from("tcp_0");

        connector.enable_tls(&id);
        assert!(matches!(
            rx.try_pop(),
            Some(Command::EnableTls { trust_policy: TrustPolicy::Strict, .. })
        ));

        connector.set_trust_policy(&id, TrustPolicy::Permissive);
        connector.enable_tls(&id);
        assert!(matches!(
            rx.try_pop(),
            Some(Command::EnableTls { trust_policy: TrustPolicy::Permissive, .. })
        ));
    }
}
