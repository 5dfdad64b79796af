use log::*;
use std::collections::HashMap;
use std::sync::Arc;

use super::connection::Connection;

pub type NotifyCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct CallbackEntry {
    connection: Connection,
    value_handle: u16,
    callback: NotifyCallback,
}

/// Live notification subscriptions, at most one per `(connection, value handle)`.
///
/// Not synchronized by itself; `Central` keeps it behind a single mutex so a notification
/// lookup can't interleave with a concurrent unsubscribe.
#[derive(Default)]
pub(in crate) struct SubscriptionRegistry {
    entries: HashMap<(Connection, u16), CallbackEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if an existing entry for the same key was replaced.
    pub fn insert(&mut self, connection: Connection, value_handle: u16, callback: NotifyCallback) -> bool {
        let replaced = self.entries.insert((connection, value_handle), CallbackEntry {
            connection,
            value_handle,
            callback,
        }).is_some();
        debug!("subscription {}/{:#06x} {}", connection, value_handle,
            if replaced { "replaced" } else { "added" });
        replaced
    }

    pub fn remove(&mut self, connection: Connection, value_handle: u16) -> bool {
        let removed = self.entries.remove(&(connection, value_handle)).is_some();
        if removed {
            debug!("subscription {}/{:#06x} removed", connection, value_handle);
        }
        removed
    }

    /// Removes every subscription on `connection`, returning how many there were.
    pub fn remove_connection(&mut self, connection: Connection) -> usize {
        let keys: Vec<_> = self.entries.values()
            .filter(|e| e.connection == connection)
            .map(|e| (e.connection, e.value_handle))
            .collect();
        for key in &keys {
            self.entries.remove(key);
            debug!("subscription {}/{:#06x} dropped", key.0, key.1);
        }
        keys.len()
    }

    pub fn lookup(&self, connection: Connection, value_handle: u16) -> Option<NotifyCallback> {
        self.entries.get(&(connection, value_handle))
            .map(|e| e.callback.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
