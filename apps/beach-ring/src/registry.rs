use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::SendError};
use uuid::Uuid;

use crate::signaling::ServerMessage;

/// Identifies one accepted connection for the lifetime of its session.
pub type ConnectionId = Uuid;

/// Write side of a session's channel, tagged with the owning connection. The
/// channel is drained in order by the connection's writer task.
#[derive(Clone, Debug)]
pub struct PeerSink {
    connection_id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl PeerSink {
    pub fn new(connection_id: ConnectionId, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Single delivery attempt. Fails only once the connection is gone.
    pub fn send(&self, message: ServerMessage) -> Result<(), SendError<ServerMessage>> {
        self.sender.send(message)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Process-wide directory of identity -> sink. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct IdentityRegistry {
    entries: Arc<DashMap<String, PeerSink>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `sink`, replacing any previous binding. The displaced
    /// sink is returned but left open.
    pub fn put(&self, identity: impl Into<String>, sink: PeerSink) -> Option<PeerSink> {
        self.entries.insert(identity.into(), sink)
    }

    /// Remove `identity` only while it is still bound to `owner`. Returns true
    /// when an entry was removed.
    pub fn remove(&self, identity: &str, owner: ConnectionId) -> bool {
        self.entries
            .remove_if(identity, |_, sink| sink.connection_id == owner)
            .is_some()
    }

    pub fn lookup(&self, identity: &str) -> Option<PeerSink> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted snapshot of the registered identities.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        identities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (PeerSink, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerSink::new(Uuid::new_v4(), tx), rx)
    }

    #[test]
    fn lookup_returns_latest_binding() {
        let registry = IdentityRegistry::new();
        let (first, _first_rx) = sink();
        let (second, _second_rx) = sink();

        assert!(registry.put("alice", first.clone()).is_none());
        let displaced = registry.put("alice", second.clone()).unwrap();
        assert_eq!(displaced.connection_id(), first.connection_id());

        let found = registry.lookup("alice").unwrap();
        assert_eq!(found.connection_id(), second.connection_id());
        assert_eq!(registry.len(), 1);
        // the displaced channel is not closed by the overwrite
        assert!(!first.is_closed());
    }

    #[test]
    fn remove_keeps_newer_binding() {
        let registry = IdentityRegistry::new();
        let (a, _a_rx) = sink();
        let (b, _b_rx) = sink();

        registry.put("alice", a.clone());
        registry.put("alice", b.clone());

        assert!(!registry.remove("alice", a.connection_id()));
        assert_eq!(
            registry.lookup("alice").unwrap().connection_id(),
            b.connection_id()
        );

        assert!(registry.remove("alice", b.connection_id()));
        assert!(registry.lookup("alice").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_missing_identity_is_noop() {
        let registry = IdentityRegistry::new();
        assert!(!registry.remove("nobody", Uuid::new_v4()));
        assert!(!registry.remove("", Uuid::new_v4()));
    }

    #[test]
    fn clones_share_entries() {
        let registry = IdentityRegistry::new();
        let shared = registry.clone();
        let (a, _rx) = sink();
        registry.put("b", a.clone());
        registry.put("a", a);
        assert_eq!(shared.identities(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_registrations_settle_on_one_owner() {
        let registry = IdentityRegistry::new();
        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..32 {
            let (peer, rx) = sink();
            receivers.push(rx);
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.put("shared", peer.clone());
                peer.connection_id()
            }));
        }
        let mut owners = Vec::new();
        for handle in handles {
            owners.push(handle.await.unwrap());
        }

        let winner = registry.lookup("shared").unwrap().connection_id();
        assert!(owners.contains(&winner));
        for owner in owners.iter().filter(|id| **id != winner) {
            assert!(!registry.remove("shared", *owner));
        }
        assert!(registry.remove("shared", winner));
    }
}
