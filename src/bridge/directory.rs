use dashmap::DashMap;
use libp2p::{Multiaddr, PeerId};
use serde::Serialize;
use std::collections::HashSet;

/// Directory entry for a sibling instance in the mesh.
#[derive(Debug, Clone)]
pub struct InstanceEntry {
    /// Multiaddresses advertised by this instance.
    pub multiaddrs: Vec<Multiaddr>,
    /// Broker channels this instance is subscribed to.
    pub channels: HashSet<String>,
    /// Last seen timestamp.
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

/// Tracks sibling instances and their channel subscriptions.
///
/// Populated from identify events (addresses) and gossipsub subscription
/// events (channels). Purely observational — nothing routes through it; it
/// feeds the cluster-info endpoint so operators can see the mesh.
#[derive(Default)]
pub struct InstanceDirectory {
    peers: DashMap<PeerId, InstanceEntry>,
}

impl InstanceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh an instance's advertised addresses.
    pub fn update_multiaddrs(&self, peer_id: &PeerId, multiaddrs: Vec<Multiaddr>) {
        self.peers
            .entry(*peer_id)
            .and_modify(|entry| {
                entry.multiaddrs = multiaddrs.clone();
                entry.last_seen = chrono::Utc::now();
            })
            .or_insert_with(|| InstanceEntry {
                multiaddrs,
                channels: HashSet::new(),
                last_seen: chrono::Utc::now(),
            });
    }

    /// Record a channel subscription (gossipsub subscribe event).
    pub fn add_channel(&self, peer_id: &PeerId, channel: &str) {
        self.peers
            .entry(*peer_id)
            .and_modify(|entry| {
                entry.channels.insert(channel.to_string());
                entry.last_seen = chrono::Utc::now();
            })
            .or_insert_with(|| InstanceEntry {
                multiaddrs: Vec::new(),
                channels: HashSet::from([channel.to_string()]),
                last_seen: chrono::Utc::now(),
            });
    }

    /// Drop a channel subscription.
    pub fn remove_channel(&self, peer_id: &PeerId, channel: &str) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.channels.remove(channel);
        }
    }

    /// Remove an instance on disconnect.
    pub fn unregister(&self, peer_id: &PeerId) {
        self.peers.remove(peer_id);
    }

    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }

    /// Snapshot for the cluster-info endpoint.
    pub fn snapshot(&self) -> Vec<InstancePeerInfo> {
        self.peers
            .iter()
            .map(|entry| InstancePeerInfo {
                peer_id: entry.key().to_string(),
                multiaddrs: entry.multiaddrs.iter().map(|a| a.to_string()).collect(),
                channels: entry.channels.iter().cloned().collect(),
            })
            .collect()
    }
}

/// Serializable peer info for the cluster-info endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct InstancePeerInfo {
    pub peer_id: String,
    pub multiaddrs: Vec<String>,
    pub channels: Vec<String>,
}
