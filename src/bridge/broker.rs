use futures_util::StreamExt;
use libp2p::{gossipsub, identify, identity, noise, yamux, Multiaddr, Swarm, SwarmBuilder};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::behaviour::{build_behaviour, BridgeBehaviour, BridgeBehaviourEvent};
use super::config::ClusterConfig;
use super::directory::InstanceDirectory;

/// Commands sent from the rest of the process into the broker loop.
pub enum BrokerCommand {
    /// Subscribe this instance to a broker channel.
    Subscribe(String),
    /// Publish an encoded frame on a channel.
    Publish { channel: String, data: Vec<u8> },
}

/// Events emitted from the broker loop to the bridge consumer.
pub enum BrokerEvent {
    /// A frame arrived on a subscribed channel.
    Message { channel: String, data: Vec<u8> },
}

/// Build the mesh swarm for this instance.
pub async fn build_swarm(
    keypair: identity::Keypair,
    config: &ClusterConfig,
) -> Result<Swarm<BridgeBehaviour>, Box<dyn std::error::Error>> {
    let config = config.clone();

    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            Default::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_behaviour(|key| build_behaviour(key, &config))?
        .build();

    Ok(swarm)
}

/// Run the broker loop.
///
/// Spawned as a tokio task. Multiplexes swarm events (inbound gossip frames,
/// peer bookkeeping) with commands from the bridge (subscribe, publish).
///
/// Failure policy: if the listener cannot be bound the loop logs and returns.
/// The command channel then has no receiver and the event channel closes, so
/// the instance degrades to local-only delivery — it never crashes over a
/// broken mesh.
pub async fn run_broker_loop(
    mut swarm: Swarm<BridgeBehaviour>,
    mut cmd_rx: mpsc::UnboundedReceiver<BrokerCommand>,
    evt_tx: mpsc::UnboundedSender<BrokerEvent>,
    directory: Arc<InstanceDirectory>,
    listen_addr: Multiaddr,
    peers: Vec<String>,
) {
    match swarm.listen_on(listen_addr.clone()) {
        Ok(_) => tracing::info!("Broker mesh listening on {}", listen_addr),
        Err(e) => {
            tracing::error!(
                "Cannot bind broker mesh listener on {}: {}; continuing in local-only mode",
                listen_addr,
                e
            );
            return;
        }
    }

    // Dial configured sibling instances. Failures are logged only — peers may
    // simply not be up yet, and identify fills in the rest over time.
    for peer in &peers {
        match peer.parse::<Multiaddr>() {
            Ok(addr) => {
                if let Err(e) = swarm.dial(addr) {
                    tracing::warn!(peer = peer.as_str(), error = %e, "Failed to dial sibling instance");
                }
            }
            Err(e) => {
                tracing::warn!(peer = peer.as_str(), error = %e, "Invalid sibling multiaddr in config")
            }
        }
    }

    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &evt_tx, &directory);
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => handle_broker_command(&mut swarm, cmd),
                    None => {
                        tracing::info!("Broker command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn handle_swarm_event(
    event: libp2p::swarm::SwarmEvent<BridgeBehaviourEvent>,
    evt_tx: &mpsc::UnboundedSender<BrokerEvent>,
    directory: &InstanceDirectory,
) {
    use libp2p::swarm::SwarmEvent;

    match event {
        SwarmEvent::Behaviour(behaviour_event) => {
            handle_behaviour_event(behaviour_event, evt_tx, directory);
        }
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            tracing::info!("Sibling instance connected: {}", peer_id);
        }
        SwarmEvent::ConnectionClosed { peer_id, .. } => {
            tracing::info!("Sibling instance disconnected: {}", peer_id);
            directory.unregister(&peer_id);
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            tracing::info!("Broker mesh address: {}", address);
        }
        _ => {}
    }
}

fn handle_behaviour_event(
    event: BridgeBehaviourEvent,
    evt_tx: &mpsc::UnboundedSender<BrokerEvent>,
    directory: &InstanceDirectory,
) {
    match event {
        BridgeBehaviourEvent::Gossipsub(gossipsub::Event::Message { message, .. }) => {
            let channel = message.topic.to_string();
            let _ = evt_tx.send(BrokerEvent::Message {
                channel,
                data: message.data,
            });
        }
        BridgeBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed { peer_id, topic }) => {
            directory.add_channel(&peer_id, &topic.to_string());
        }
        BridgeBehaviourEvent::Gossipsub(gossipsub::Event::Unsubscribed { peer_id, topic }) => {
            directory.remove_channel(&peer_id, &topic.to_string());
        }
        BridgeBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
            directory.update_multiaddrs(&peer_id, info.listen_addrs);
        }
        _ => {}
    }
}

fn handle_broker_command(swarm: &mut Swarm<BridgeBehaviour>, cmd: BrokerCommand) {
    match cmd {
        BrokerCommand::Subscribe(channel) => {
            let topic = gossipsub::IdentTopic::new(&channel);
            match swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                Ok(true) => tracing::info!("Subscribed to broker channel: {}", channel),
                Ok(false) => tracing::debug!("Already subscribed to channel: {}", channel),
                Err(e) => tracing::error!("Failed to subscribe to {}: {:?}", channel, e),
            }
        }
        BrokerCommand::Publish { channel, data } => {
            let topic = gossipsub::IdentTopic::new(&channel);
            if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic, data) {
                // Includes InsufficientPeers when we are the only instance up.
                // Local delivery already happened; only cross-instance reach
                // is degraded.
                tracing::warn!("Publish to {} failed: {:?}", channel, e);
            }
        }
    }
}
