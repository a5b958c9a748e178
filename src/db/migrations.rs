use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses the SQLite user_version pragma for tracking — no migration table.
///
/// The directory tables mirror what the identity/CRUD services own; this
/// process never writes them outside of test seeding. `messages` is the
/// durable chat log, append-only from every instance.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: directory replica + message log

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_users_tenant ON users(tenant_id);

CREATE TABLE teams (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    manager_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (manager_id) REFERENCES users(id)
);

CREATE INDEX idx_teams_tenant ON teams(tenant_id);

CREATE TABLE team_members (
    team_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (team_id, user_id),
    FOREIGN KEY (team_id) REFERENCES teams(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX idx_team_members_user ON team_members(user_id);

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    team_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    body TEXT NOT NULL,
    media_ref TEXT,
    created_at_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_messages_team_created ON messages(team_id, created_at_ms);
",
    )])
}
