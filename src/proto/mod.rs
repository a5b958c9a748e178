//! Wire types for the WebSocket protocol and the inter-instance broker.
//!
//! These are hand-maintained prost messages rather than protoc output — the
//! protocol is three messages deep and the field tags below ARE the wire
//! contract. Tags must never be reused or renumbered; add new fields with new
//! tags and keep old ones reserved.

/// The immutable unit of a chat message.
///
/// Stamped entirely by the server at publish time: `id` is a fresh UUIDv7,
/// `sender_id`/`sender_name`/`tenant_id` come from the authenticated
/// connection, `created_at_ms` is the origin instance's wall clock. Never
/// mutated after construction; the same bytes go to the durable log, local
/// sockets, and the broker.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageEnvelope {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub tenant_id: String,
    #[prost(string, tag = "3")]
    pub team_id: String,
    #[prost(string, tag = "4")]
    pub sender_id: String,
    #[prost(string, tag = "5")]
    pub sender_name: String,
    #[prost(string, tag = "6")]
    pub body: String,
    /// Optional reference to an uploaded attachment (opaque to this layer).
    #[prost(string, optional, tag = "7")]
    pub media_ref: Option<String>,
    #[prost(uint64, tag = "8")]
    pub created_at_ms: u64,
}

/// A direct notification for a single user (ticket assigned, mention, ...).
/// Originates in the surrounding product, not from client frames.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UserNotice {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub tenant_id: String,
    #[prost(string, tag = "3")]
    pub user_id: String,
    /// Notice discriminator, e.g. "ticket:assigned".
    #[prost(string, tag = "4")]
    pub kind: String,
    #[prost(string, tag = "5")]
    pub body: String,
    #[prost(uint64, tag = "6")]
    pub created_at_ms: u64,
}

/// Client → server frame: send a message to the team this connection was
/// admitted for. Any identity the client embeds in `body` is just text; the
/// server never reads identity from the payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SendTeamMessage {
    #[prost(string, tag = "1")]
    pub body: String,
    #[prost(string, optional, tag = "2")]
    pub media_ref: Option<String>,
}

pub mod frame {
    /// Frame payload discriminator.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        SendTeamMessage(super::SendTeamMessage),
    }
}

/// Client → server envelope. Unknown payload tags decode to `payload: None`
/// and are dropped by the protocol handler.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Frame {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(oneof = "frame::Payload", tags = "2")]
    pub payload: Option<frame::Payload>,
}

pub mod event {
    /// Event payload discriminator.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        NewMessage(super::MessageEnvelope),
        #[prost(message, tag = "2")]
        Notice(super::UserNotice),
    }
}

/// Server → client envelope.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Event {
    #[prost(oneof = "event::Payload", tags = "1, 2")]
    pub payload: Option<event::Payload>,
}

pub mod broker_frame {
    /// Broker payload discriminator.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        TeamMessage(super::MessageEnvelope),
        #[prost(message, tag = "3")]
        UserNotice(super::UserNotice),
    }
}

/// Instance → instance frame carried on a broker channel.
///
/// `origin` is the publishing instance's peer id. Consumers drop frames whose
/// origin matches their own instance and never re-publish what they received —
/// the one loop-prevention rule of the bridge.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BrokerFrame {
    #[prost(string, tag = "1")]
    pub origin: String,
    #[prost(oneof = "broker_frame::Payload", tags = "2, 3")]
    pub payload: Option<broker_frame::Payload>,
}
