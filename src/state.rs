use std::sync::Arc;
use std::time::Duration;

use crate::auth::gate::IdentityGate;
use crate::bridge::{InstanceDirectory, PubSubBridge};
use crate::chat::log::MessageLog;
use crate::db::DbPool;
use crate::registry::ConnectionRegistry;
use crate::teams::MembershipDirectory;

/// Shared application state passed to all handlers via the axum State
/// extractor. The external collaborators (identity gate, membership
/// directory, message log) sit behind trait objects so integration tests can
/// substitute failing or canned implementations.
#[derive(Clone)]
pub struct AppState {
    /// Directory replica + message log storage
    pub db: DbPool,
    /// Live connections on THIS instance
    pub registry: Arc<ConnectionRegistry>,
    /// Resolves bearer credentials to identities
    pub identity_gate: Arc<dyn IdentityGate>,
    /// Team existence / membership lookups
    pub membership: Arc<dyn MembershipDirectory>,
    /// Append-only durable chat log
    pub message_log: Arc<dyn MessageLog>,
    /// Publishing half of the cross-instance bridge
    pub bridge: PubSubBridge,
    /// Sibling instances seen on the mesh (for /api/cluster/info)
    pub instance_directory: Arc<InstanceDirectory>,
    /// Mesh listener port (for /api/cluster/info)
    pub cluster_port: u16,
    /// Window for completing the connection handshake
    pub handshake_timeout: Duration,
}
