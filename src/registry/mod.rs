//! Per-instance connection registry.
//!
//! Tracks every live WebSocket connection on THIS instance, indexed two ways:
//! team id → connections (for broadcast) and user id → connection (for
//! direct delivery). No other instance ever reads or writes this state; the
//! bridge is the only path between instances.
//!
//! A user holds at most one live connection per instance. Registering a
//! second connection for the same user replaces the entry and hands the
//! stale sender back to the caller, which is responsible for closing it.

use axum::extract::ws::Message;
use dashmap::DashMap;
use prost::Message as ProstMessage;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::proto::Event;

/// Sender half of a connection's outbound channel. Cloning this is how any
/// part of the system pushes frames to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// A registered connection: the handle plus the identity it was admitted for.
#[derive(Debug, Clone)]
pub struct Connection {
    pub conn_id: Uuid,
    pub user_id: String,
    pub team_id: String,
    pub sender: ConnectionSender,
}

impl Connection {
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[derive(Debug, Clone)]
struct TeamEntry {
    conn_id: Uuid,
    user_id: String,
    sender: ConnectionSender,
}

/// The registry itself. Owned by one instance, shared across its connection
/// tasks and the bridge consumer via `Arc`; dashmap serializes map mutation
/// so no caller needs an outer lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// team id → live connections admitted for that team
    teams: DashMap<String, Vec<TeamEntry>>,
    /// user id → the user's single live connection on this instance
    users: DashMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to both indices.
    ///
    /// Returns the sender of a replaced connection when the user already had
    /// one on this instance; the caller must close that handle. Idempotent
    /// with respect to registry consistency — the maps never end up with two
    /// entries for one user.
    pub fn register(&self, conn: Connection) -> Option<ConnectionSender> {
        self.teams
            .entry(conn.team_id.clone())
            .or_default()
            .push(TeamEntry {
                conn_id: conn.conn_id,
                user_id: conn.user_id.clone(),
                sender: conn.sender.clone(),
            });

        let replaced = self.users.insert(conn.user_id.clone(), conn);

        // The replaced connection's team entry is stale now; drop it so a
        // broadcast never hits the superseded handle.
        if let Some(ref prev) = replaced {
            self.remove_team_entry(&prev.team_id, prev.conn_id);
        }

        replaced.map(|prev| prev.sender)
    }

    /// Remove a connection from both indices. Removing a connection that is
    /// not present is a no-op, and the user entry is only dropped when it
    /// still points at this connection (it may have been replaced already).
    pub fn unregister(&self, conn_id: Uuid, team_id: &str, user_id: &str) {
        self.remove_team_entry(team_id, conn_id);
        self.users.remove_if(user_id, |_, c| c.conn_id == conn_id);
    }

    /// Send an event to every live connection registered for `team_id`.
    ///
    /// Best-effort: a dead connection discovered mid-send is pruned and the
    /// loop keeps going — one broken socket never blocks the rest of the
    /// team. The event is encoded once and the frame cloned per receiver.
    pub fn local_broadcast(&self, team_id: &str, event: &Event) {
        let msg = Message::Binary(event.encode_to_vec().into());

        let mut dead: Vec<(Uuid, String)> = Vec::new();
        if let Some(entries) = self.teams.get(team_id) {
            for entry in entries.iter() {
                if entry.sender.send(msg.clone()).is_err() {
                    dead.push((entry.conn_id, entry.user_id.clone()));
                }
            }
        }

        for (conn_id, user_id) in dead {
            tracing::debug!(
                team_id = %team_id,
                user_id = %user_id,
                "Pruning dead connection found during broadcast"
            );
            self.unregister(conn_id, team_id, &user_id);
        }
    }

    /// Deliver an event to a single user's connection, if they are connected
    /// to this instance. Silent no-op otherwise — reaching users on other
    /// instances is the bridge's job.
    pub fn send_to_user(&self, user_id: &str, event: &Event) {
        let Some(conn) = self.users.get(user_id).map(|c| c.clone()) else {
            return;
        };

        let msg = Message::Binary(event.encode_to_vec().into());
        if conn.sender.send(msg).is_err() {
            self.unregister(conn.conn_id, &conn.team_id, user_id);
        }
    }

    /// Push a close frame to a user's live connection (deactivation, kick).
    /// The connection task observes the closed socket and unregisters itself.
    pub fn force_close_user(&self, user_id: &str, close_code: u16, reason: &str) {
        if let Some(conn) = self.users.get(user_id) {
            let frame = axum::extract::ws::CloseFrame {
                code: close_code,
                reason: reason.to_string().into(),
            };
            let _ = conn.sender.send(Message::Close(Some(frame)));
        }
    }

    /// Number of connections currently registered for a team.
    pub fn team_connection_count(&self, team_id: &str) -> usize {
        self.teams.get(team_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Whether a user has a live connection on this instance.
    pub fn is_user_connected(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Total connections on this instance (one per user by construction).
    pub fn connection_count(&self) -> usize {
        self.users.len()
    }

    fn remove_team_entry(&self, team_id: &str, conn_id: Uuid) {
        let mut drop_team = false;
        if let Some(mut entries) = self.teams.get_mut(team_id) {
            entries.retain(|e| e.conn_id != conn_id);
            drop_team = entries.is_empty();
        }
        // Empty team sets are garbage-collected so the map does not grow
        // with every team ever seen. Removal happens after the shard guard
        // above is released.
        if drop_team {
            self.teams.remove_if(team_id, |_, v| v.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{event, MessageEnvelope};

    fn test_event(body: &str) -> Event {
        Event {
            payload: Some(event::Payload::NewMessage(MessageEnvelope {
                id: "m1".into(),
                tenant_id: "acme".into(),
                team_id: "t1".into(),
                sender_id: "u1".into(),
                sender_name: "User One".into(),
                body: body.into(),
                media_ref: None,
                created_at_ms: 1,
            })),
        }
    }

    fn connect(
        registry: &ConnectionRegistry,
        user_id: &str,
        team_id: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::now_v7();
        let replaced = registry.register(Connection {
            conn_id,
            user_id: user_id.into(),
            team_id: team_id.into(),
            sender: tx,
        });
        assert!(replaced.is_none(), "unexpected replacement for {user_id}");
        (conn_id, rx)
    }

    #[test]
    fn broadcast_reaches_all_team_members_and_only_them() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx_a) = connect(&registry, "alice", "t1");
        let (_, mut rx_b) = connect(&registry, "bob", "t1");
        let (_, mut rx_c) = connect(&registry, "carol", "t2");

        registry.local_broadcast("t1", &test_event("hello"));

        assert!(matches!(rx_a.try_recv(), Ok(Message::Binary(_))));
        assert!(matches!(rx_b.try_recv(), Ok(Message::Binary(_))));
        assert!(rx_c.try_recv().is_err(), "t2 member must not receive");
    }

    #[test]
    fn broadcast_prunes_dead_connections() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx_a) = connect(&registry, "alice", "t1");
        let (_, rx_b) = connect(&registry, "bob", "t1");
        drop(rx_b); // bob's socket died without unregistering

        registry.local_broadcast("t1", &test_event("hello"));

        assert!(matches!(rx_a.try_recv(), Ok(Message::Binary(_))));
        assert_eq!(registry.team_connection_count("t1"), 1);
        assert!(!registry.is_user_connected("bob"));
    }

    #[test]
    fn second_connection_replaces_first() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx_first) = connect(&registry, "alice", "t1");

        let (tx2, mut rx_second) = mpsc::unbounded_channel();
        let replaced = registry.register(Connection {
            conn_id: Uuid::now_v7(),
            user_id: "alice".into(),
            team_id: "t1".into(),
            sender: tx2,
        });
        assert!(replaced.is_some(), "first connection should be handed back");
        assert_eq!(registry.team_connection_count("t1"), 1);
        assert_eq!(registry.connection_count(), 1);

        registry.local_broadcast("t1", &test_event("hi"));
        assert!(rx_first.try_recv().is_err(), "stale handle must not receive");
        assert!(matches!(rx_second.try_recv(), Ok(Message::Binary(_))));
    }

    #[test]
    fn unregister_clears_both_indices_and_gc_empty_team() {
        let registry = ConnectionRegistry::new();
        let (conn_id, _rx) = connect(&registry, "alice", "t1");

        registry.unregister(conn_id, "t1", "alice");

        assert_eq!(registry.team_connection_count("t1"), 0);
        assert!(!registry.is_user_connected("alice"));
        // no-op on repeat
        registry.unregister(conn_id, "t1", "alice");
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn unregister_of_replaced_connection_keeps_new_entry() {
        let registry = ConnectionRegistry::new();
        let (old_id, _rx_old) = connect(&registry, "alice", "t1");

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let new_id = Uuid::now_v7();
        registry.register(Connection {
            conn_id: new_id,
            user_id: "alice".into(),
            team_id: "t1".into(),
            sender: tx2,
        });

        // The superseded connection's task winds down and unregisters itself;
        // that must not evict the replacement.
        registry.unregister(old_id, "t1", "alice");
        assert!(registry.is_user_connected("alice"));
        assert_eq!(registry.team_connection_count("t1"), 1);
    }

    #[test]
    fn force_close_pushes_a_close_frame() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx) = connect(&registry, "alice", "t1");

        registry.force_close_user("alice", 4010, "account deactivated");

        match rx.try_recv() {
            Ok(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 4010);
                assert_eq!(frame.reason.as_str(), "account deactivated");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn send_to_user_is_noop_for_absent_user() {
        let registry = ConnectionRegistry::new();
        registry.send_to_user("nobody", &test_event("x"));
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn send_to_user_delivers_locally() {
        let registry = ConnectionRegistry::new();
        let (_, mut rx) = connect(&registry, "alice", "t1");
        registry.send_to_user("alice", &test_event("direct"));
        assert!(matches!(rx.try_recv(), Ok(Message::Binary(_))));
    }
}
