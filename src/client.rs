//! Control connection state.
//!
//! A `Client` owns the two byte buffers of one control session plus the flags
//! the session loop and the transport use to coordinate: `exit_requested`
//! (the session is over, tear the connection down) and a pending flush
//! (the outbound buffer has replies the transport should deliver). While
//! `discarding` is set, the rest of an over-long line is being skipped.
//!
//! `ClientRegistry` tracks every connected client for introspection commands.

use crate::buffer::{ByteBuffer, DEFAULT_CAPACITY};
use chrono::{DateTime, Utc};
use slab::Slab;
use std::fmt;

/// Identifier of a control connection, unique while it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub usize);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A single control connection.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    inbound: ByteBuffer,
    outbound: ByteBuffer,
    exit_requested: bool,
    flush_pending: bool,
    discarding: bool,
}

impl Client {
    /// Create a connection with empty buffers.
    pub fn new(id: ClientId) -> Self {
        Self::with_capacity(id, DEFAULT_CAPACITY)
    }

    /// Create a connection whose buffers start with `capacity` bytes of room.
    pub fn with_capacity(id: ClientId, capacity: usize) -> Self {
        Self {
            id,
            inbound: ByteBuffer::with_capacity(capacity),
            outbound: ByteBuffer::with_capacity(capacity),
            exit_requested: false,
            flush_pending: false,
            discarding: false,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Bytes received from the peer and not yet framed.
    pub fn inbound(&self) -> &ByteBuffer {
        &self.inbound
    }

    pub fn inbound_mut(&mut self) -> &mut ByteBuffer {
        &mut self.inbound
    }

    /// Replies waiting to be delivered.
    pub fn outbound(&self) -> &ByteBuffer {
        &self.outbound
    }

    pub fn outbound_mut(&mut self) -> &mut ByteBuffer {
        &mut self.outbound
    }

    /// Flag the session as finished. The transport tears the connection down.
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Ask the transport to deliver the outbound buffer.
    pub fn push_output(&mut self) {
        self.flush_pending = true;
    }

    /// Observe and clear a pending flush request.
    pub fn take_flush_request(&mut self) -> bool {
        std::mem::take(&mut self.flush_pending)
    }

    /// Skip inbound bytes up to and including the next LF.
    pub fn start_discarding(&mut self) {
        self.discarding = true;
    }

    pub fn stop_discarding(&mut self) {
        self.discarding = false;
    }

    pub fn discarding(&self) -> bool {
        self.discarding
    }
}

/// What the registry knows about a connected client.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Peer description (socket address, or "stdio").
    pub peer: String,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
}

/// Registry of connected clients using slab allocation.
///
/// Slab keys double as `ClientId`s, so ids are reused after disconnect.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Slab<ClientInfo>,
    max_clients: usize,
}

impl ClientRegistry {
    /// Create a registry admitting at most `max_clients` clients.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: Slab::with_capacity(max_clients.min(1024)),
            max_clients,
        }
    }

    /// Register a client.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, info: ClientInfo) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }
        Some(ClientId(self.clients.insert(info)))
    }

    /// Remove a client.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientInfo> {
        self.clients.try_remove(id.0)
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientInfo> {
        self.clients.get(id.0)
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Iterate over connected clients in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &ClientInfo)> {
        self.clients.iter().map(|(key, info)| (ClientId(key), info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(peer: &str) -> ClientInfo {
        ClientInfo {
            peer: peer.to_string(),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_client_flags() {
        let mut client = Client::new(ClientId(3));
        assert_eq!(client.id(), ClientId(3));
        assert!(!client.exit_requested());
        assert!(!client.take_flush_request());

        client.push_output();
        assert!(client.take_flush_request());
        // Cleared once observed
        assert!(!client.take_flush_request());

        client.request_exit();
        assert!(client.exit_requested());

        assert!(!client.discarding());
        client.start_discarding();
        assert!(client.discarding());
        client.stop_discarding();
        assert!(!client.discarding());
    }

    #[test]
    fn test_client_buffers_are_independent() {
        let mut client = Client::new(ClientId(0));
        client.inbound_mut().append(b"in");
        client.outbound_mut().append(b"out");
        assert_eq!(client.inbound().peek(), b"in");
        assert_eq!(client.outbound().peek(), b"out");
    }

    #[test]
    fn test_client_registry() {
        let mut registry = ClientRegistry::new(2);

        let id1 = registry.insert(info("10.0.0.1:5000")).unwrap();
        let id2 = registry.insert(info("10.0.0.2:5000")).unwrap();

        // At capacity
        assert!(registry.insert(info("10.0.0.3:5000")).is_none());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(id2).unwrap().peer, "10.0.0.2:5000");

        registry.remove(id1);
        assert!(registry.get(id1).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id1).is_none());

        let peers: Vec<_> = registry.iter().map(|(_, c)| c.peer.clone()).collect();
        assert_eq!(peers, vec!["10.0.0.2:5000"]);
    }

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId(7).to_string(), "client-7");
    }
}
