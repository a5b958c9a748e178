//! Inbound frame protocol: wire frames in, server-stamped envelopes out.
//!
//! Malformed or unrecognized frames are logged and dropped without a reply
//! and without closing the connection — a misbehaving client costs a log
//! line, not a disconnect. Everything identity-shaped on an outgoing
//! envelope comes from the admitted connection state, never the payload.

use prost::Message as ProstMessage;

use crate::auth::gate::Identity;
use crate::chat::fanout;
use crate::proto::{frame, Frame};
use crate::state::AppState;

/// Maximum message body length (chars). Bodies beyond this are dropped.
const MAX_BODY_LENGTH: usize = 4000;

/// Handle one binary frame from an admitted connection.
pub fn handle_binary_message(data: &[u8], state: &AppState, identity: &Identity, team_id: &str) {
    let frame = match Frame::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id = %identity.user_id,
                error = %e,
                "Undecodable frame dropped"
            );
            return;
        }
    };

    match frame.payload {
        Some(frame::Payload::SendTeamMessage(send)) => {
            handle_send_team_message(state, identity, team_id, send.body, send.media_ref);
        }
        None => {
            // Empty payload or a tag this build does not know.
            tracing::debug!(
                user_id = %identity.user_id,
                request_id = %frame.request_id,
                "Frame with unknown payload dropped"
            );
        }
    }
}

fn handle_send_team_message(
    state: &AppState,
    identity: &Identity,
    team_id: &str,
    body: String,
    media_ref: Option<String>,
) {
    let body = body.trim().to_string();
    if body.is_empty() && media_ref.is_none() {
        tracing::debug!(user_id = %identity.user_id, "Empty message dropped");
        return;
    }
    if body.len() > MAX_BODY_LENGTH {
        tracing::warn!(
            user_id = %identity.user_id,
            length = body.len(),
            "Oversized message body dropped"
        );
        return;
    }

    let envelope = fanout::stamp_envelope(identity, team_id, body, media_ref);
    fanout::deliver_team_message(state, envelope);
}
