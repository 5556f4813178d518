//! Shared server state used by the built-in commands.
//!
//! Provides:
//! - A thread-safe string key-value store
//! - The registry of connected control clients
//! - Server-wide counters and start time for `stats`

use crate::client::{ClientId, ClientInfo, ClientRegistry};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

/// Thread-safe in-memory key-value store.
#[derive(Debug, Default)]
pub struct Store {
    data: RwLock<HashMap<String, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous one.
    pub fn set(&self, key: &str, value: &str) -> Option<String> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(key.to_string(), value.to_string())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(key).cloned()
    }

    /// Remove a key, returning true if it existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.remove(key).is_some()
    }

    /// All keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = data.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Server-wide counters.
#[derive(Debug, Default)]
pub struct Counters {
    pub total_connections: AtomicU64,
    pub commands: AtomicU64,
    pub parse_errors: AtomicU64,
    pub discarded_lines: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime_secs: i64,
    pub curr_clients: usize,
    pub total_connections: u64,
    pub commands: u64,
    pub parse_errors: u64,
    pub discarded_lines: u64,
    pub keys: usize,
}

/// State shared by every control session of a server.
#[derive(Debug)]
pub struct ServerState {
    pub store: Store,
    pub counters: Counters,
    clients: Mutex<ClientRegistry>,
    started_at: DateTime<Utc>,
}

impl ServerState {
    /// Create shared state admitting at most `max_clients` clients.
    pub fn new(max_clients: usize) -> Arc<Self> {
        info!(max_clients, "Initializing server state");
        Arc::new(Self {
            store: Store::new(),
            counters: Counters::default(),
            clients: Mutex::new(ClientRegistry::new(max_clients)),
            started_at: Utc::now(),
        })
    }

    /// Register a newly connected client.
    ///
    /// Returns `None` if the client limit is reached.
    pub fn register(&self, peer: &str) -> Option<ClientId> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let id = clients.insert(ClientInfo {
            peer: peer.to_string(),
            connected_at: Utc::now(),
        })?;
        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);
        debug!(client = %id, peer, "Registered client");
        Some(id)
    }

    pub fn unregister(&self, id: ClientId) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if clients.remove(id).is_some() {
            debug!(client = %id, "Unregistered client");
        }
    }

    /// Connected clients in id order.
    pub fn clients(&self) -> Vec<(ClientId, ClientInfo)> {
        let clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.iter().map(|(id, info)| (id, info.clone())).collect()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stats(&self) -> StatsSnapshot {
        let curr_clients = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        StatsSnapshot {
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            curr_clients,
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            commands: self.counters.commands.load(Ordering::Relaxed),
            parse_errors: self.counters.parse_errors.load(Ordering::Relaxed),
            discarded_lines: self.counters.discarded_lines.load(Ordering::Relaxed),
            keys: self.store.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_set_get_delete() {
        let store = Store::new();
        assert_eq!(store.set("k", "v1"), None);
        assert_eq!(store.set("k", "v2"), Some("v1".to_string()));
        assert_eq!(store.get("k").as_deref(), Some("v2"));

        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert!(store.get("k").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_sorted() {
        let store = Store::new();
        store.set("b", "2");
        store.set("a", "1");
        store.set("c", "3");
        assert_eq!(store.keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_concurrent_access() {
        let state = ServerState::new(16);
        let mut handles = vec![];

        for i in 0..8 {
            let state = Arc::clone(&state);
            handles.push(thread::spawn(move || {
                for j in 0..50 {
                    let key = format!("key-{i}-{j}");
                    state.store.set(&key, "x");
                    assert!(state.store.get(&key).is_some());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(state.store.len(), 400);
    }

    #[test]
    fn test_client_registration() {
        let state = ServerState::new(1);
        let id = state.register("127.0.0.1:1234").unwrap();
        assert!(state.register("127.0.0.1:1235").is_none());

        let clients = state.clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].0, id);
        assert_eq!(clients[0].1.peer, "127.0.0.1:1234");

        state.unregister(id);
        assert!(state.clients().is_empty());
        assert_eq!(state.stats().total_connections, 1);
        assert_eq!(state.stats().curr_clients, 0);
    }
}
