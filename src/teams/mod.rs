//! The Membership Check seam: read-only lookups against the team directory.
//!
//! Teams and their member sets are owned and mutated by the CRUD layer; this
//! subsystem only consults them during the connection handshake. Membership
//! is deliberately NOT re-checked per message — see DESIGN.md.

use async_trait::async_trait;

use crate::db::DbPool;

/// External collaborator: team existence and membership lookups, always
/// scoped to a tenant.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn team_exists(&self, team_id: &str, tenant_id: &str) -> bool;
    async fn is_member(&self, team_id: &str, user_id: &str, tenant_id: &str) -> bool;
}

/// Production directory backed by the replicated team tables in SQLite.
pub struct SqliteMembershipDirectory {
    db: DbPool,
}

impl SqliteMembershipDirectory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipDirectory for SqliteMembershipDirectory {
    async fn team_exists(&self, team_id: &str, tenant_id: &str) -> bool {
        let db = self.db.clone();
        let tid = team_id.to_string();
        let tenant = tenant_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().ok()?;
            conn.query_row(
                "SELECT COUNT(*) FROM teams WHERE id = ?1 AND tenant_id = ?2",
                rusqlite::params![tid, tenant],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .ok()
        })
        .await
        .ok()
        .flatten()
        .unwrap_or(false)
    }

    async fn is_member(&self, team_id: &str, user_id: &str, tenant_id: &str) -> bool {
        let db = self.db.clone();
        let tid = team_id.to_string();
        let uid = user_id.to_string();
        let tenant = tenant_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = db.lock().ok()?;
            conn.query_row(
                "SELECT COUNT(*) FROM team_members tm
                 JOIN teams t ON t.id = tm.team_id
                 WHERE tm.team_id = ?1 AND tm.user_id = ?2 AND t.tenant_id = ?3",
                rusqlite::params![tid, uid, tenant],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .ok()
        })
        .await
        .ok()
        .flatten()
        .unwrap_or(false)
    }
}
