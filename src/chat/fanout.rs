//! Outbound fan-out pipeline for chat events.
//!
//! One entry point per event category. Both follow the same priority order:
//! local delivery first, durability and cross-instance reach as concurrent
//! best-effort side effects that may individually fail without taking the
//! broadcast down with them.

use chrono::Utc;
use uuid::Uuid;

use crate::auth::gate::Identity;
use crate::proto::{event, Event, MessageEnvelope, UserNotice};
use crate::state::AppState;

/// Build a server-stamped envelope from a validated message body.
/// Identity comes from the authenticated connection, never the payload.
pub fn stamp_envelope(
    identity: &Identity,
    team_id: &str,
    body: String,
    media_ref: Option<String>,
) -> MessageEnvelope {
    MessageEnvelope {
        id: Uuid::now_v7().to_string(),
        tenant_id: identity.tenant_id.clone(),
        team_id: team_id.to_string(),
        sender_id: identity.user_id.clone(),
        sender_name: identity.display_name.clone(),
        body,
        media_ref,
        created_at_ms: Utc::now().timestamp_millis() as u64,
    }
}

/// Deliver a locally-originated team message: append to the durable log
/// (fire-and-forget), broadcast to local team members, publish on the bridge.
///
/// The append is spawned before the broadcast and runs concurrently with it —
/// local latency must not regress when the log or the broker is slow.
pub fn deliver_team_message(state: &AppState, envelope: MessageEnvelope) {
    let log = state.message_log.clone();
    let for_log = envelope.clone();
    tokio::spawn(async move {
        if let Err(e) = log.append(&for_log).await {
            tracing::warn!(
                message_id = %for_log.id,
                team_id = %for_log.team_id,
                error = %e,
                "Durable log append failed; message delivered without persistence"
            );
        }
    });

    let team_id = envelope.team_id.clone();
    let outbound = Event {
        payload: Some(event::Payload::NewMessage(envelope.clone())),
    };
    state.registry.local_broadcast(&team_id, &outbound);

    state.bridge.publish_team_message(&envelope);
}

/// Deliver a direct notice to one user wherever they are connected: locally
/// if they are on this instance, and via the bridge for every other instance.
/// Called by the surrounding product (ticket events etc.), not by clients.
pub fn dispatch_user_notice(state: &AppState, notice: UserNotice) {
    let user_id = notice.user_id.clone();
    let outbound = Event {
        payload: Some(event::Payload::Notice(notice.clone())),
    };
    state.registry.send_to_user(&user_id, &outbound);

    state.bridge.publish_user_notice(&notice);
}
