use serde::{Deserialize, Serialize};

/// Cross-instance cluster configuration.
/// Exposed in `huddle.toml` under the `[cluster]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Whether this instance joins the broker mesh at all.
    /// Disabled means permanent local-only mode (single-instance deploys).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Mesh listener port (separate from the HTTP port).
    /// Default: 7401
    #[serde(default = "default_cluster_port")]
    pub cluster_port: u16,

    /// Multiaddrs of sibling instances to dial at startup, e.g.
    /// "/ip4/10.0.0.2/tcp/7401". Instances also learn peers via identify.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Gossipsub mesh degree (D): peers to maintain per channel.
    /// Default: 4 — fan-out clusters are small, the default 6 is oversized.
    #[serde(default = "default_mesh_n")]
    pub mesh_n: usize,

    /// Mesh low watermark (D_lo); repair triggers below this.
    /// Default: 2
    #[serde(default = "default_mesh_n_low")]
    pub mesh_n_low: usize,

    /// Mesh high watermark (D_hi); pruning triggers above this.
    /// Default: 8
    #[serde(default = "default_mesh_n_high")]
    pub mesh_n_high: usize,

    /// Maximum broker frame size in bytes.
    /// Default: 65536 (64 KiB — chat bodies plus envelope metadata)
    #[serde(default = "default_max_transmit_size")]
    pub max_transmit_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            cluster_port: default_cluster_port(),
            peers: Vec::new(),
            mesh_n: default_mesh_n(),
            mesh_n_low: default_mesh_n_low(),
            mesh_n_high: default_mesh_n_high(),
            max_transmit_size: default_max_transmit_size(),
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_cluster_port() -> u16 {
    7401
}
fn default_mesh_n() -> usize {
    4
}
fn default_mesh_n_low() -> usize {
    2
}
fn default_mesh_n_high() -> usize {
    8
}
fn default_max_transmit_size() -> usize {
    65536
}
