//! Recording host bridge.
//!
//! Keeps every emitted event in order and answers certificate prompts
//! with a fixed decision. Waiters block on a condition variable until a
//! predicate over the recorded events holds or a deadline passes.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{Attribute, AttributeStore, AttributeValue, CertificatePrompt, EventName, HostBridge};
use crate::connection::ConnectionId;
use crate::marshal::WireArg;

/// One emitted event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Target connection.
    pub connection: ConnectionId,
    /// Callback name.
    pub event: EventName,
    /// Marshalled arguments.
    pub args: Vec<WireArg>,
    /// `readyState` attribute at the moment of the call.
    pub ready_state: Option<i64>,
}

impl RecordedEvent {
    /// Decoded text of the first text argument.
    pub fn text(&self) -> Option<String> {
        self.args.iter().find_map(WireArg::decode_text)
    }

    /// First boolean argument.
    pub fn flag(&self) -> Option<bool> {
        self.args.iter().find_map(WireArg::as_bool)
    }

    /// Log level token of an `onlog` event.
    pub fn level(&self) -> Option<&'static str> {
        self.args.iter().find_map(WireArg::as_token)
    }
}

/// In-memory [`HostBridge`].
#[derive(Debug)]
pub struct MemoryBridge {
    attributes: AttributeStore,
    events: Mutex<Vec<RecordedEvent>>,
    changed: Condvar,
    cert_decision: Mutex<Option<bool>>,
    prompts: Mutex<Vec<(ConnectionId, CertificatePrompt)>>,
}

impl Default for MemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBridge {
    /// Creates a bridge that gives no certificate verdict.
    pub fn new() -> Self {
        Self {
            attributes: AttributeStore::new(),
            events: Mutex::new(Vec::new()),
            changed: Condvar::new(),
            cert_decision: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Creates a bridge that answers every certificate prompt with `decision`.
    pub fn with_cert_decision(decision: bool) -> Self {
        let bridge = Self::new();
        bridge.set_cert_decision(Some(decision));
        bridge
    }

    /// Changes the certificate verdict.
    pub fn set_cert_decision(&self, decision: Option<bool>) {
        *self.cert_decision.lock().expect("cert decision mutex poisoned") = decision;
    }

    /// Attribute store backing this bridge.
    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    /// Snapshot of every recorded event.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("events mutex poisoned").clone()
    }

    /// Recorded events for one connection.
    pub fn events_for(&self, connection: &ConnectionId) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .expect("events mutex poisoned")
            .iter()
            .filter(|e| &e.connection == connection)
            .cloned()
            .collect()
    }

    /// Event names for one connection, in emission order.
    pub fn event_names(&self, connection: &ConnectionId) -> Vec<EventName> {
        self.events_for(connection).iter().map(|e| e.event).collect()
    }

    /// Concatenated `onmessage` text for one connection.
    pub fn received_text(&self, connection: &ConnectionId) -> String {
        self.events_for(connection)
            .iter()
            .filter(|e| e.event == EventName::Message)
            .filter_map(RecordedEvent::text)
            .collect()
    }

    /// Certificate prompts received so far.
    pub fn prompts(&self) -> Vec<(ConnectionId, CertificatePrompt)> {
        self.prompts.lock().expect("prompts mutex poisoned").clone()
    }

    /// Blocks until `predicate` holds over the recorded events or `timeout`
    /// elapses. Returns whether the predicate held.
    pub fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&[RecordedEvent]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().expect("events mutex poisoned");
        loop {
            if predicate(&events) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            events = self
                .changed
                .wait_timeout(events, deadline - now)
                .expect("events mutex poisoned")
                .0;
        }
    }

    /// Waits until `connection` has received `event` at least `count` times.
    pub fn wait_for_event(
        &self,
        connection: &ConnectionId,
        event: EventName,
        count: usize,
        timeout: Duration,
    ) -> bool {
        self.wait_for(timeout, |events| {
            events
                .iter()
                .filter(|e| &e.connection == connection && e.event == event)
                .count()
                >= count
        })
    }

    fn ready_state_of(&self, connection: &ConnectionId) -> Option<i64> {
        self.attributes
            .get(connection, Attribute::ReadyState)
            .and_then(|v| v.as_int())
    }

    fn record(&self, event: RecordedEvent) {
        self.events.lock().expect("events mutex poisoned").push(event);
        self.changed.notify_all();
    }
}

impl HostBridge for MemoryBridge {
    fn emit(&self, connection: &ConnectionId, event: EventName, args: &[WireArg]) {
        self.record(RecordedEvent {
            connection: connection.clone(),
            event,
            args: args.to_vec(),
            ready_state: self.ready_state_of(connection),
        });
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
        self.prompts
            .lock()
            .expect("prompts mutex poisoned")
            .push((connection.clone(), prompt.clone()));
        self.record(RecordedEvent {
            connection: connection.clone(),
            event: EventName::CertError,
            args: vec![
                WireArg::text(&prompt.subject),
                WireArg::text(&prompt.issuer),
                WireArg::text(&prompt.description),
            ],
            ready_state: self.ready_state_of(connection),
        });
        *self.cert_decision.lock().expect("cert decision mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_records_events_in_order() {
        let bridge = MemoryBridge::new();
        let id = ConnectionId::from("c1");
        bridge.set_attribute(&id, Attribute::ReadyState, AttributeValue::Int(1));
        bridge.emit(&id, EventName::Open, &[]);
        bridge.emit(&id, EventName::Message, &[WireArg::text("hi")]);
        bridge.set_attribute(&id, Attribute::ReadyState, AttributeValue::Int(2));
        assert_eq!(bridge.event_names(&id), vec![EventName::Open, EventName::Message]);
        assert_eq!(bridge.received_text(&id), "hi");
        assert_eq!(bridge.events_for(&id)[0].ready_state, Some(1));
    }

    #[test]
    fn test_wait_for_wakes_on_emit() {
        let bridge = Arc::new(MemoryBridge::new());
        let id = ConnectionId::from("c1");
        let emitter = {
            let bridge = Arc::clone(&bridge);
            let id = id.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                bridge.emit(&id, EventName::Close, &[]);
            })
        };
        assert!(bridge.wait_for_event(&id, EventName::Close, 1, Duration::from_secs(5)));
        emitter.join().expect("emitter thread panicked");
    }

    #[test]
    fn test_wait_for_times_out() {
        let bridge = MemoryBridge::new();
        let id = ConnectionId::from("c1");
        assert!(!bridge.wait_for_event(&id, EventName::Open, 1, Duration::from_millis(10)));
    }

    #[test]
    fn test_prompt_records_and_answers() {
        let bridge = MemoryBridge::with_cert_decision(true);
        let id = ConnectionId::from("c1");
        let prompt = CertificatePrompt {
            subject: "CN=x".into(),
            issuer: "CN=y".into(),
            description: "d".into(),
        };
        assert_eq!(bridge.prompt_certificate_decision(&id, &prompt), Some(true));
        assert_eq!(bridge.prompts().len(), 1);
        assert_eq!(bridge.event_names(&id), vec![EventName::CertError]);

        bridge.set_cert_decision(None);
        assert_eq!(bridge.prompt_certificate_decision(&id, &prompt), None);
    }
}
