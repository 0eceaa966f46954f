//! In-memory per-connection attribute store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{Attribute, AttributeValue};
use crate::connection::ConnectionId;

/// Thread-safe attribute map keyed by connection and attribute.
///
/// Shared between submitters (which read `readyState` and
/// `certTrustPolicy`) and the executor (which writes lifecycle state).
#[derive(Debug, Default)]
pub struct AttributeStore {
    values: RwLock<HashMap<ConnectionId, HashMap<Attribute, AttributeValue>>>,
}

impl AttributeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads one attribute.
    pub fn get(&self, connection: &ConnectionId, attribute: Attribute) -> Option<AttributeValue> {
        self.values
            .read()
            .expect("attribute store lock poisoned")
            .get(connection)
            .and_then(|attrs| attrs.get(&attribute))
            .cloned()
    }

    /// Writes one attribute.
    pub fn set(&self, connection: &ConnectionId, attribute: Attribute, value: AttributeValue) {
        self.values
            .write()
            .expect("attribute store lock poisoned")
            .entry(connection.clone())
            .or_default()
            .insert(attribute, value);
    }

    /// Connections that have at least one attribute.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.values
            .read()
            .expect("attribute store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Drops every attribute of a connection.
    pub fn remove(&self, connection: &ConnectionId) {
        self.values
            .write()
            .expect("attribute store lock poisoned")
            .remove(connection);
    }
}
