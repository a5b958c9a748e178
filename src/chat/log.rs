//! The durable message log seam.
//!
//! History endpoints live in the CRUD layer; this subsystem only appends.
//! An append failure degrades durability, never delivery — callers log the
//! error and carry on broadcasting.

use async_trait::async_trait;
use chrono::Utc;

use crate::db::DbPool;
use crate::proto::MessageEnvelope;

/// Errors surfaced by the log. Always absorbed at the call site.
#[derive(Debug)]
pub enum LogError {
    Db(String),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(e) => write!(f, "message log error: {}", e),
        }
    }
}

/// External collaborator: append-only chat history storage.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(&self, envelope: &MessageEnvelope) -> Result<(), LogError>;
}

/// Production log backed by the `messages` table. Insert-only; concurrent
/// writers across instances never touch the same row.
pub struct SqliteMessageLog {
    db: DbPool,
}

impl SqliteMessageLog {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn append(&self, envelope: &MessageEnvelope) -> Result<(), LogError> {
        let db = self.db.clone();
        let env = envelope.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| LogError::Db(e.to_string()))?;
            conn.execute(
                "INSERT INTO messages (id, tenant_id, team_id, sender_id, sender_name, body, media_ref, created_at_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    env.id,
                    env.tenant_id,
                    env.team_id,
                    env.sender_id,
                    env.sender_name,
                    env.body,
                    env.media_ref,
                    env.created_at_ms as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| LogError::Db(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| LogError::Db(e.to_string()))?
    }
}
