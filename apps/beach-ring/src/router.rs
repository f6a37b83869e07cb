use metrics::counter;
use tracing::debug;

use crate::registry::IdentityRegistry;
use crate::signaling::{ClientMessage, ServerMessage};

/// What happened to a routed message. Never reported back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the target's sink
    Delivered,
    /// Target identity has no registry entry
    NoRoute,
    /// Target sink already closed; stale entry evicted
    Closed,
    /// Action is not a routed one (`register`, unknown)
    NotRouted,
}

/// Forward `message` to the peer it addresses, stamped with `from`.
pub fn route(registry: &IdentityRegistry, from: &str, message: ClientMessage) -> RouteOutcome {
    let action = message.action_label();
    let Some((to, outbound)) = outbound_for(message, from) else {
        return RouteOutcome::NotRouted;
    };

    let Some(sink) = registry.lookup(&to) else {
        debug!(from, to = %to, action, "target not registered; dropping");
        counter!("beach_ring_routing_misses_total", 1, "action" => action);
        return RouteOutcome::NoRoute;
    };

    match sink.send(outbound) {
        Ok(()) => {
            counter!("beach_ring_messages_routed_total", 1, "action" => action);
            RouteOutcome::Delivered
        }
        Err(_) => {
            debug!(from, to = %to, action, "target sink closed; evicting");
            registry.remove(&to, sink.connection_id());
            counter!("beach_ring_routing_misses_total", 1, "action" => action);
            RouteOutcome::Closed
        }
    }
}

fn outbound_for(message: ClientMessage, from: &str) -> Option<(String, ServerMessage)> {
    let from = from.to_string();
    match message {
        ClientMessage::Call { to, signal } => Some((to, ServerMessage::IncomingCall { from, signal })),
        ClientMessage::Answer { to, signal } => Some((to, ServerMessage::CallAnswer { from, signal })),
        ClientMessage::Ice { to, candidate } => Some((to, ServerMessage::Ice { from, candidate })),
        ClientMessage::Bye { to } => Some((to, ServerMessage::CallEnded { from })),
        ClientMessage::Register { .. } | ClientMessage::Unknown { .. } => None,
    }
}
