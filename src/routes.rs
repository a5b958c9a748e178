use axum::{extract::State, routing::get, Json, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /api/cluster/info — this instance's mesh identity and the sibling
/// instances it currently sees. Operators use this to verify the fan-out
/// mesh is actually connected; an empty peer list on a multi-instance
/// deployment means local-only mode.
async fn cluster_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "instance_id": state.bridge.instance_id(),
        "cluster_port": state.cluster_port,
        "connected_instances": state.instance_directory.connected_count(),
        "local_connections": state.registry.connection_count(),
        "peers": state.instance_directory.snapshot(),
    }))
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Build the axum Router. The surface is deliberately tiny: the CRUD API,
/// session middleware, and rate limiting all live in the surrounding product.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/health", get(health_check))
        .route("/api/cluster/info", get(cluster_info))
        .with_state(state)
}
