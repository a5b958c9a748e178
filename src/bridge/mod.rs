//! Pub/Sub Bridge: makes team broadcasts visible across instances.
//!
//! Each instance runs behind the same load balancer but shares no memory
//! with its siblings. The bridge publishes locally-originated envelopes on
//! two well-known broker channels and feeds received copies back into the
//! local connection registry. The broker transport is a gossipsub mesh
//! between instances, driven through command/event channels so the rest of
//! the process never touches libp2p types; an in-process broker backs
//! single-instance deployments and the test suite.
//!
//! Degradation policy: a missing or failing broker never takes the process
//! down. Publish failures are logged and swallowed (local delivery already
//! happened); a dead broker at startup leaves the instance in local-only
//! mode, still serving its own clients.

pub mod behaviour;
pub mod broker;
pub mod config;
pub mod directory;
pub mod identity;
pub mod memory;

pub use broker::{BrokerCommand, BrokerEvent};
pub use config::ClusterConfig;
pub use directory::InstanceDirectory;
pub use memory::InMemoryBroker;

use prost::Message as ProstMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::proto::{broker_frame, event, BrokerFrame, Event};
use crate::registry::ConnectionRegistry;

/// Broker channel carrying team message envelopes.
pub const TEAM_MESSAGES_CHANNEL: &str = "huddle/team-messages";
/// Broker channel carrying direct user notices.
pub const USER_NOTICES_CHANNEL: &str = "huddle/user-notices";

/// Publishing half of the bridge. Cheap to clone; lives in `AppState`.
///
/// When no broker task holds the receiving end (cluster disabled, or the
/// broker loop bailed out at startup) every publish fails fast and is
/// logged at debug level — that IS local-only mode.
#[derive(Clone)]
pub struct PubSubBridge {
    cmd_tx: mpsc::UnboundedSender<BrokerCommand>,
    instance_id: String,
}

impl PubSubBridge {
    pub fn new(cmd_tx: mpsc::UnboundedSender<BrokerCommand>, instance_id: String) -> Self {
        Self { cmd_tx, instance_id }
    }

    /// A bridge with no broker behind it. Publishes become no-ops.
    pub fn local_only(instance_id: String) -> Self {
        let (cmd_tx, _) = mpsc::unbounded_channel();
        Self { cmd_tx, instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Subscribe to the two well-known channels. Called once at startup.
    pub fn subscribe_well_known(&self) {
        for channel in [TEAM_MESSAGES_CHANNEL, USER_NOTICES_CHANNEL] {
            if self
                .cmd_tx
                .send(BrokerCommand::Subscribe(channel.to_string()))
                .is_err()
            {
                tracing::warn!(
                    channel = channel,
                    "Broker unavailable at subscribe time; running local-only"
                );
            }
        }
    }

    /// Publish a locally-originated team message for the other instances.
    pub fn publish_team_message(&self, envelope: &crate::proto::MessageEnvelope) {
        self.publish(
            TEAM_MESSAGES_CHANNEL,
            broker_frame::Payload::TeamMessage(envelope.clone()),
        );
    }

    /// Publish a locally-originated user notice for the other instances.
    pub fn publish_user_notice(&self, notice: &crate::proto::UserNotice) {
        self.publish(
            USER_NOTICES_CHANNEL,
            broker_frame::Payload::UserNotice(notice.clone()),
        );
    }

    fn publish(&self, channel: &str, payload: broker_frame::Payload) {
        let frame = BrokerFrame {
            origin: self.instance_id.clone(),
            payload: Some(payload),
        };
        let sent = self.cmd_tx.send(BrokerCommand::Publish {
            channel: channel.to_string(),
            data: frame.encode_to_vec(),
        });
        if sent.is_err() {
            // Local broadcast already happened; only cross-instance reach is lost.
            tracing::debug!(channel = channel, "No broker attached; publish skipped");
        }
    }
}

/// Spawn the inbound consumer: decodes broker frames and replays them into
/// this instance's registry. Received frames are never re-published, and
/// frames that carry our own origin id are dropped — the two rules that
/// prevent propagation loops.
pub fn spawn_inbound_consumer(
    registry: Arc<ConnectionRegistry>,
    mut evt_rx: mpsc::UnboundedReceiver<BrokerEvent>,
    instance_id: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = evt_rx.recv().await {
            let BrokerEvent::Message { channel, data } = event;
            handle_broker_message(&registry, &instance_id, &channel, &data);
        }
        tracing::info!("Broker event channel closed; bridge consumer stopped");
    })
}

fn handle_broker_message(
    registry: &ConnectionRegistry,
    instance_id: &str,
    channel: &str,
    data: &[u8],
) {
    let frame = match BrokerFrame::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(channel = channel, error = %e, "Undecodable broker frame dropped");
            return;
        }
    };

    if frame.origin == instance_id {
        // Our own publish looped back (in-process broker does this).
        return;
    }

    match (channel, frame.payload) {
        (TEAM_MESSAGES_CHANNEL, Some(broker_frame::Payload::TeamMessage(envelope))) => {
            tracing::debug!(
                message_id = %envelope.id,
                team_id = %envelope.team_id,
                origin = %frame.origin,
                "Replaying remote team message to local members"
            );
            let team_id = envelope.team_id.clone();
            let outbound = Event {
                payload: Some(event::Payload::NewMessage(envelope)),
            };
            registry.local_broadcast(&team_id, &outbound);
        }
        (USER_NOTICES_CHANNEL, Some(broker_frame::Payload::UserNotice(notice))) => {
            let user_id = notice.user_id.clone();
            let outbound = Event {
                payload: Some(event::Payload::Notice(notice)),
            };
            registry.send_to_user(&user_id, &outbound);
        }
        (_, payload) => {
            tracing::warn!(
                channel = channel,
                origin = %frame.origin,
                has_payload = payload.is_some(),
                "Broker frame with mismatched channel/payload dropped"
            );
        }
    }
}
