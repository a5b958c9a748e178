use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::bridge::ClusterConfig;

/// Huddle messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "huddle-server", version, about = "Huddle team messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HUDDLE_PORT", default_value = "7400")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HUDDLE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./huddle.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HUDDLE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "HUDDLE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Seconds a connection may spend in the handshake before it is closed.
    /// Guards against sockets parked half-admitted forever.
    #[arg(long, env = "HUDDLE_HANDSHAKE_TIMEOUT_SECS", default_value = "10")]
    pub handshake_timeout_secs: u64,

    /// Cluster mesh configuration (loaded from [cluster] section in TOML)
    #[arg(skip)]
    #[serde(default = "default_cluster_config")]
    pub cluster: Option<ClusterConfig>,
}

fn default_cluster_config() -> Option<ClusterConfig> {
    Some(ClusterConfig::default())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7400,
            bind_address: "0.0.0.0".to_string(),
            config: "./huddle.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            handshake_timeout_secs: 10,
            cluster: Some(ClusterConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HUDDLE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("HUDDLE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Huddle Messaging Server Configuration
# Place this file at ./huddle.toml or specify with --config <path>
# All settings can be overridden via environment variables (HUDDLE_PORT, etc.)
# or CLI flags (--port, etc.)

# HTTP/WebSocket port (default: 7400)
# port = 7400

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and key material
# data_dir = "./data"

# Seconds a connection may spend in the handshake before being closed
# handshake_timeout_secs = 10

# ---- Cross-Instance Cluster Mesh ----
# [cluster]

# Join the broker mesh at startup. Disable for single-instance deployments;
# the instance then runs in permanent local-only mode.
# enabled = true

# Mesh listener port (separate from the HTTP port)
# cluster_port = 7401

# Sibling instances to dial at startup
# peers = ["/ip4/10.0.0.2/tcp/7401", "/ip4/10.0.0.3/tcp/7401"]

# Gossipsub mesh parameters (fan-out clusters are small)
# mesh_n = 4           # D: mesh degree (peers per channel)
# mesh_n_low = 2       # D_lo: triggers mesh repair below this
# mesh_n_high = 8      # D_hi: prunes mesh above this
# max_transmit_size = 65536  # Max broker frame size in bytes (64 KiB)
"#
    .to_string()
}
