mod auth;
mod bridge;
mod chat;
mod config;
mod db;
mod proto;
mod registry;
mod routes;
mod state;
mod teams;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use libp2p::PeerId;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use config::{generate_config_template, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "huddle_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "huddle_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Huddle server v{} starting", env!("CARGO_PKG_VERSION"));

    // Directory replica + durable message log live in SQLite
    let db = db::init_db(&config.data_dir)?;

    // Shared token verification key (written by the identity service in
    // production; generated on first boot for embedded setups)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // --- Cross-instance bridge setup ---
    let cluster_config = config.cluster.clone().unwrap_or_default();

    // Stable mesh identity for this instance
    let keypair = bridge::identity::instance_keypair(&config.data_dir);
    let instance_id = PeerId::from(keypair.public()).to_string();

    let registry = Arc::new(registry::ConnectionRegistry::new());
    let instance_directory = Arc::new(bridge::InstanceDirectory::new());

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<bridge::BrokerCommand>();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel::<bridge::BrokerEvent>();

    if cluster_config.enabled {
        // A failure anywhere in here degrades to local-only mode; the HTTP
        // surface and local fan-out keep running regardless.
        match bridge::broker::build_swarm(keypair, &cluster_config).await {
            Ok(swarm) => {
                let listen_addr: libp2p::Multiaddr =
                    format!("/ip4/0.0.0.0/tcp/{}", cluster_config.cluster_port).parse()?;
                let directory_for_broker = instance_directory.clone();
                let peers = cluster_config.peers.clone();
                tokio::spawn(async move {
                    bridge::broker::run_broker_loop(
                        swarm,
                        cmd_rx,
                        evt_tx,
                        directory_for_broker,
                        listen_addr,
                        peers,
                    )
                    .await;
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Broker mesh setup failed; running local-only");
                drop(cmd_rx);
            }
        }
    } else {
        tracing::info!("Cluster mesh disabled; running local-only");
        drop(cmd_rx);
    }

    let pubsub = bridge::PubSubBridge::new(cmd_tx, instance_id);
    pubsub.subscribe_well_known();
    bridge::spawn_inbound_consumer(registry.clone(), evt_rx, pubsub.instance_id().to_string());

    // Build application state
    let app_state = state::AppState {
        db: db.clone(),
        registry,
        identity_gate: Arc::new(auth::gate::JwtIdentityGate::new(jwt_secret)),
        membership: Arc::new(teams::SqliteMembershipDirectory::new(db.clone())),
        message_log: Arc::new(chat::log::SqliteMessageLog::new(db)),
        bridge: pubsub,
        instance_directory,
        cluster_port: cluster_config.cluster_port,
        handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
