use libp2p::{gossipsub, identify, identity, ping, swarm::NetworkBehaviour};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::config::ClusterConfig;

/// Composed NetworkBehaviour for an instance's mesh node: gossipsub for the
/// broker channels, identify for peer bookkeeping, ping for liveness.
#[derive(NetworkBehaviour)]
pub struct BridgeBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

/// Build the composed behaviour from cluster configuration.
pub fn build_behaviour(keypair: &identity::Keypair, config: &ClusterConfig) -> BridgeBehaviour {
    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .mesh_n(config.mesh_n)
        .mesh_n_low(config.mesh_n_low)
        .mesh_n_high(config.mesh_n_high)
        .heartbeat_interval(Duration::from_secs(1))
        .max_transmit_size(config.max_transmit_size)
        .validation_mode(gossipsub::ValidationMode::Strict)
        // Small clusters: send to every subscribed peer, not just the mesh.
        .flood_publish(true)
        .message_id_fn(|msg| {
            // Dedup by SHA-256 content hash
            let mut hasher = Sha256::new();
            hasher.update(&msg.data);
            gossipsub::MessageId::from(hasher.finalize().to_vec())
        })
        .build()
        .expect("Valid gossipsub config");

    let gossipsub_behaviour = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )
    .expect("Valid gossipsub behaviour");

    BridgeBehaviour {
        gossipsub: gossipsub_behaviour,
        identify: identify::Behaviour::new(identify::Config::new(
            "/huddle/1.0.0".to_string(),
            keypair.public(),
        )),
        ping: ping::Behaviour::default(),
    }
}
