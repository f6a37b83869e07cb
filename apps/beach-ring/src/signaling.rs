use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use thiserror::Error;

/// Opaque handshake payload (SDP description, ICE candidate, ...) kept as the
/// exact JSON text the sender produced.
pub type Payload = Box<RawValue>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Messages sent from a client to the relay, one variant per `action`.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Bind this connection to an identity
    Register { key: String },
    /// Offer a call to another identity
    Call {
        to: String,
        signal: Option<Payload>,
    },
    /// Answer an incoming call
    Answer {
        to: String,
        signal: Option<Payload>,
    },
    /// Trickle a network-path candidate
    Ice {
        to: String,
        candidate: Option<Payload>,
    },
    /// Hang up
    Bye { to: String },
    /// Anything else; accepted and ignored
    Unknown { action: String },
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let fields: Option<HashMap<String, Payload>> = serde_json::from_str(text)?;
        Ok(Self::from_fields(fields.unwrap_or_default()))
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let fields: Option<HashMap<String, Payload>> = serde_json::from_slice(bytes)?;
        Ok(Self::from_fields(fields.unwrap_or_default()))
    }

    // Missing or wrong-typed fields resolve to empty values instead of failing
    // the whole frame.
    fn from_fields(mut fields: HashMap<String, Payload>) -> Self {
        let action = string_field(&mut fields, "action");
        match action.as_str() {
            "register" => ClientMessage::Register {
                key: string_field(&mut fields, "key"),
            },
            "call" => ClientMessage::Call {
                to: string_field(&mut fields, "to"),
                signal: fields.remove("signal"),
            },
            "answer" => ClientMessage::Answer {
                to: string_field(&mut fields, "to"),
                signal: fields.remove("signal"),
            },
            "ice" => ClientMessage::Ice {
                to: string_field(&mut fields, "to"),
                candidate: fields.remove("candidate"),
            },
            "bye" => ClientMessage::Bye {
                to: string_field(&mut fields, "to"),
            },
            _ => ClientMessage::Unknown { action },
        }
    }

    /// Stable label for logs and metrics.
    pub fn action_label(&self) -> &'static str {
        match self {
            ClientMessage::Register { .. } => "register",
            ClientMessage::Call { .. } => "call",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::Ice { .. } => "ice",
            ClientMessage::Bye { .. } => "bye",
            ClientMessage::Unknown { .. } => "unknown",
        }
    }
}

fn string_field(fields: &mut HashMap<String, Payload>, name: &str) -> String {
    fields
        .remove(name)
        .and_then(|raw| serde_json::from_str::<String>(raw.get()).ok())
        .unwrap_or_default()
}

/// Messages sent from the relay to a registered client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerMessage {
    IncomingCall {
        from: String,
        signal: Option<Payload>,
    },
    CallAnswer {
        from: String,
        signal: Option<Payload>,
    },
    Ice {
        from: String,
        candidate: Option<Payload>,
    },
    CallEnded {
        from: String,
    },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn action_label(&self) -> &'static str {
        match self {
            ServerMessage::IncomingCall { .. } => "incoming_call",
            ServerMessage::CallAnswer { .. } => "call_answer",
            ServerMessage::Ice { .. } => "ice",
            ServerMessage::CallEnded { .. } => "call_ended",
        }
    }

    pub fn from_identity(&self) -> &str {
        match self {
            ServerMessage::IncomingCall { from, .. }
            | ServerMessage::CallAnswer { from, .. }
            | ServerMessage::Ice { from, .. }
            | ServerMessage::CallEnded { from } => from,
        }
    }
}
