use metrics::counter;
use tracing::{debug, info};

use crate::registry::{ConnectionId, IdentityRegistry, PeerSink};
use crate::router::{self, RouteOutcome};
use crate::signaling::{ClientMessage, DecodeError};

/// Lifecycle of one connection's binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound(String),
    Terminated,
}

/// Per-connection state machine. Owns the connection's identity binding and
/// releases it on termination, including when dropped mid-flight.
pub struct SessionHandler {
    registry: IdentityRegistry,
    sink: PeerSink,
    state: SessionState,
}

impl SessionHandler {
    pub fn new(registry: IdentityRegistry, sink: PeerSink) -> Self {
        Self {
            registry,
            sink,
            state: SessionState::Unbound,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.sink.connection_id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn bound_identity(&self) -> Option<&str> {
        match &self.state {
            SessionState::Bound(identity) => Some(identity),
            _ => None,
        }
    }

    /// Decode a text frame and act on it. A decode error is fatal to the
    /// session; the caller is expected to terminate.
    pub fn handle_text(&mut self, text: &str) -> Result<(), DecodeError> {
        let message = ClientMessage::decode(text)?;
        self.handle_message(message);
        Ok(())
    }

    pub fn handle_bytes(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let message = ClientMessage::decode_bytes(bytes)?;
        self.handle_message(message);
        Ok(())
    }

    pub fn handle_message(&mut self, message: ClientMessage) -> RouteOutcome {
        if self.state == SessionState::Terminated {
            return RouteOutcome::NotRouted;
        }

        match message {
            ClientMessage::Register { key } => {
                self.register(key);
                RouteOutcome::NotRouted
            }
            ClientMessage::Unknown { action } => {
                debug!(
                    connection_id = %self.connection_id(),
                    action = %action,
                    "ignoring unrecognized action"
                );
                RouteOutcome::NotRouted
            }
            message => {
                let from = self.bound_identity().unwrap_or_default();
                router::route(&self.registry, from, message)
            }
        }
    }

    fn register(&mut self, key: String) {
        if key.is_empty() {
            debug!(connection_id = %self.connection_id(), "ignoring register with empty key");
            return;
        }

        let previous = std::mem::replace(&mut self.state, SessionState::Bound(key.clone()));
        if let SessionState::Bound(old) = previous {
            if old != key {
                self.registry.remove(&old, self.connection_id());
            }
        }

        let displaced = self.registry.put(key.clone(), self.sink.clone());
        if let Some(displaced) = displaced.filter(|d| d.connection_id() != self.connection_id()) {
            info!(
                identity = %key,
                connection_id = %self.connection_id(),
                replaced = %displaced.connection_id(),
                "identity re-registered by a new connection"
            );
        } else {
            info!(identity = %key, connection_id = %self.connection_id(), "identity registered");
        }
        counter!("beach_ring_registrations_total", 1);
    }

    /// Release the binding (if this session still owns it). Idempotent.
    pub fn terminate(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Terminated);
        if let SessionState::Bound(identity) = previous {
            let removed = self.registry.remove(&identity, self.connection_id());
            debug!(
                identity = %identity,
                connection_id = %self.connection_id(),
                removed,
                "session released identity"
            );
        }
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::ServerMessage;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn session(
        registry: &IdentityRegistry,
    ) -> (SessionHandler, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = PeerSink::new(Uuid::new_v4(), tx);
        (SessionHandler::new(registry.clone(), sink), rx)
    }

    #[test]
    fn register_binds_identity() {
        let registry = IdentityRegistry::new();
        let (mut alice, _rx) = session(&registry);
        assert_eq!(alice.state(), &SessionState::Unbound);

        alice.handle_text(r#"{"action":"register","key":"alice"}"#).unwrap();
        assert_eq!(alice.bound_identity(), Some("alice"));
        assert_eq!(
            registry.lookup("alice").unwrap().connection_id(),
            alice.connection_id()
        );
    }

    #[test]
    fn empty_key_leaves_session_unbound() {
        let registry = IdentityRegistry::new();
        let (mut s, _rx) = session(&registry);
        s.handle_text(r#"{"action":"register","key":""}"#).unwrap();
        s.handle_text(r#"{"action":"register"}"#).unwrap();
        assert_eq!(s.state(), &SessionState::Unbound);
        assert!(registry.is_empty());
    }

    #[test]
    fn re_registration_releases_previous_key() {
        let registry = IdentityRegistry::new();
        let (mut s, _rx) = session(&registry);
        s.handle_text(r#"{"action":"register","key":"first"}"#).unwrap();
        s.handle_text(r#"{"action":"register","key":"second"}"#).unwrap();

        assert_eq!(s.bound_identity(), Some("second"));
        assert!(registry.lookup("first").is_none());
        assert!(registry.lookup("second").is_some());
    }

    #[test]
    fn re_registration_does_not_evict_other_owner_of_old_key() {
        let registry = IdentityRegistry::new();
        let (mut a, _a_rx) = session(&registry);
        let (mut b, _b_rx) = session(&registry);

        a.handle_text(r#"{"action":"register","key":"alice"}"#).unwrap();
        b.handle_text(r#"{"action":"register","key":"alice"}"#).unwrap();
        a.handle_text(r#"{"action":"register","key":"alice2"}"#).unwrap();

        assert_eq!(
            registry.lookup("alice").unwrap().connection_id(),
            b.connection_id()
        );
    }

    #[test]
    fn termination_keeps_newer_registration() {
        let registry = IdentityRegistry::new();
        let (mut a, _a_rx) = session(&registry);
        let (mut b, _b_rx) = session(&registry);

        a.handle_text(r#"{"action":"register","key":"alice"}"#).unwrap();
        b.handle_text(r#"{"action":"register","key":"alice"}"#).unwrap();
        a.terminate();

        assert_eq!(
            registry.lookup("alice").unwrap().connection_id(),
            b.connection_id()
        );
        assert_eq!(a.state(), &SessionState::Terminated);
    }

    #[test]
    fn drop_releases_binding() {
        let registry = IdentityRegistry::new();
        {
            let (mut a, _rx) = session(&registry);
            a.handle_text(r#"{"action":"register","key":"a"}"#).unwrap();
            assert!(registry.lookup("a").is_some());
        }
        assert!(registry.lookup("a").is_none());
    }

    #[test]
    fn routes_with_bound_identity() {
        let registry = IdentityRegistry::new();
        let (mut a, _a_rx) = session(&registry);
        let (mut b, mut b_rx) = session(&registry);
        a.handle_text(r#"{"action":"register","key":"a"}"#).unwrap();
        b.handle_text(r#"{"action":"register","key":"b"}"#).unwrap();

        a.handle_text(r#"{"action":"call","to":"b","signal":{"sdp":"x"}}"#).unwrap();
        let received = b_rx.try_recv().unwrap();
        assert_eq!(received.action_label(), "incoming_call");
        assert_eq!(received.from_identity(), "a");
    }

    #[test]
    fn decode_failure_is_reported_to_caller() {
        let registry = IdentityRegistry::new();
        let (mut a, _rx) = session(&registry);
        a.handle_text(r#"{"action":"register","key":"a"}"#).unwrap();
        assert!(a.handle_text("{broken").is_err());
        // binding is untouched until the caller terminates
        assert_eq!(a.bound_identity(), Some("a"));
    }

    #[test]
    fn terminated_session_ignores_messages() {
        let registry = IdentityRegistry::new();
        let (mut a, _a_rx) = session(&registry);
        let (mut b, mut b_rx) = session(&registry);
        b.handle_text(r#"{"action":"register","key":"b"}"#).unwrap();

        a.terminate();
        a.handle_text(r#"{"action":"register","key":"a"}"#).unwrap();
        a.handle_text(r#"{"action":"bye","to":"b"}"#).unwrap();

        assert!(registry.lookup("a").is_none());
        assert!(b_rx.try_recv().is_err());
        assert_eq!(a.state(), &SessionState::Terminated);
    }
}
