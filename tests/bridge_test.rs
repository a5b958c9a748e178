//! Integration tests for cross-instance propagation: two server instances
//! attached to one in-process broker, each with its own registry and
//! directory replica, behaving like siblings behind a load balancer.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use prost::Message as ProstMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use huddle_server::auth::jwt;
use huddle_server::bridge::{self, InMemoryBroker, PubSubBridge};
use huddle_server::chat::fanout;
use huddle_server::chat::log::{LogError, MessageLog};
use huddle_server::proto::{event, frame, Event, Frame, SendTeamMessage, UserNotice};
use huddle_server::state::AppState;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestInstance {
    addr: SocketAddr,
    state: AppState,
    jwt_secret: Vec<u8>,
    _tmp_dir: tempfile::TempDir,
}

/// Start one instance. `broker` is Some for mesh-attached instances and None
/// for a broker-less (local-only) instance; `message_log` overrides the
/// SQLite log when a test needs an injected failure.
async fn start_instance(
    instance_id: &str,
    broker: Option<&InMemoryBroker>,
    message_log: Option<Arc<dyn MessageLog>>,
) -> TestInstance {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = huddle_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret =
        jwt::load_or_generate_jwt_secret(&data_dir).expect("Failed to generate JWT secret");

    let registry = Arc::new(huddle_server::registry::ConnectionRegistry::new());

    let pubsub = match broker {
        Some(broker) => {
            let (cmd_tx, evt_rx) = broker.attach();
            let pubsub = PubSubBridge::new(cmd_tx, instance_id.to_string());
            pubsub.subscribe_well_known();
            bridge::spawn_inbound_consumer(registry.clone(), evt_rx, instance_id.to_string());
            pubsub
        }
        None => PubSubBridge::local_only(instance_id.to_string()),
    };

    let message_log = message_log
        .unwrap_or_else(|| Arc::new(huddle_server::chat::log::SqliteMessageLog::new(db.clone())));

    let state = AppState {
        db: db.clone(),
        registry,
        identity_gate: Arc::new(huddle_server::auth::gate::JwtIdentityGate::new(
            jwt_secret.clone(),
        )),
        membership: Arc::new(huddle_server::teams::SqliteMembershipDirectory::new(db)),
        message_log,
        bridge: pubsub,
        instance_directory: Arc::new(huddle_server::bridge::InstanceDirectory::new()),
        cluster_port: 0,
        handshake_timeout: Duration::from_secs(5),
    };

    let app = huddle_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestInstance {
        addr,
        state,
        jwt_secret,
        _tmp_dir: tmp_dir,
    }
}

impl TestInstance {
    /// Seed the directory replica (each instance has its own copy, the way
    /// the replicated tables would look) and mint a token.
    fn seed_member(&self, user_id: &str, display_name: &str, team_id: &str) -> String {
        let conn = self.state.db.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO users (id, tenant_id, display_name, active, created_at)
             VALUES (?1, 'acme', ?2, 1, datetime('now'))",
            rusqlite::params![user_id, display_name],
        )
        .unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO teams (id, tenant_id, name, manager_id, created_at)
             VALUES (?1, 'acme', ?1, ?2, datetime('now'))",
            rusqlite::params![team_id, user_id],
        )
        .unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO team_members (team_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![team_id, user_id],
        )
        .unwrap();
        drop(conn);

        jwt::issue_access_token(&self.jwt_secret, user_id, "acme", display_name).unwrap()
    }

    fn logged_message_count(&self) -> i64 {
        let conn = self.state.db.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap()
    }

    async fn connect(&self, team_id: &str, token: &str) -> WsStream {
        let url = format!("ws://{}/ws?team={}&token={}", self.addr, team_id, token);
        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("Failed to connect to WebSocket");
        stream
    }
}

fn send_message_frame(body: &str) -> Message {
    let frame = Frame {
        request_id: String::new(),
        payload: Some(frame::Payload::SendTeamMessage(SendTeamMessage {
            body: body.to_string(),
            media_ref: None,
        })),
    };
    Message::Binary(frame.encode_to_vec().into())
}

async fn expect_event_payload(stream: &mut WsStream) -> event::Payload {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Binary(data) => {
                let event = Event::decode(data.as_ref()).expect("Failed to decode event");
                if let Some(payload) = event.payload {
                    return payload;
                }
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected binary event, got: {:?}", other),
        }
    }
}

#[tokio::test]
async fn message_crosses_instances_and_is_not_republished() {
    let broker = InMemoryBroker::new();
    let inst1 = start_instance("inst-1", Some(&broker), None).await;
    let inst2 = start_instance("inst-2", Some(&broker), None).await;

    let alice = inst1.seed_member("alice", "Alice", "t1");
    let bob = inst2.seed_member("bob", "Bob", "t1");

    let mut ws_alice = inst1.connect("t1", &alice).await;
    let mut ws_bob = inst2.connect("t1", &bob).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Observe raw broker traffic from here on
    let mut tap = broker.tap();

    ws_alice.send(send_message_frame("hello")).await.unwrap();

    // Bob, on the other instance, receives Alice's envelope
    match expect_event_payload(&mut ws_bob).await {
        event::Payload::NewMessage(envelope) => {
            assert_eq!(envelope.body, "hello");
            assert_eq!(envelope.sender_id, "alice");
            assert_eq!(envelope.team_id, "t1");
        }
        other => panic!("Expected NewMessage, got: {:?}", other),
    }

    // Exactly one frame crossed the broker: inst-2 must not re-publish the
    // copy it received.
    let (channel, data) = tokio::time::timeout(Duration::from_millis(500), tap.recv())
        .await
        .expect("Expected the original publish on the broker")
        .unwrap();
    assert_eq!(channel, bridge::TEAM_MESSAGES_CHANNEL);
    let frame = huddle_server::proto::BrokerFrame::decode(data.as_slice()).unwrap();
    assert_eq!(frame.origin, "inst-1");

    let second = tokio::time::timeout(Duration::from_millis(500), tap.recv()).await;
    assert!(second.is_err(), "Received instance re-published the frame");

    // Persisted once, by the origin instance only
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(inst1.logged_message_count(), 1);
    assert_eq!(inst2.logged_message_count(), 0);
}

#[tokio::test]
async fn own_broker_echo_does_not_duplicate_local_delivery() {
    let broker = InMemoryBroker::new();
    let inst1 = start_instance("inst-1", Some(&broker), None).await;

    let alice = inst1.seed_member("alice", "Alice", "t1");
    let bob = inst1.seed_member("bob", "Bob", "t1");

    let mut ws_alice = inst1.connect("t1", &alice).await;
    let mut ws_bob = inst1.connect("t1", &bob).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    ws_alice.send(send_message_frame("once")).await.unwrap();

    match expect_event_payload(&mut ws_bob).await {
        event::Payload::NewMessage(envelope) => assert_eq!(envelope.body, "once"),
        other => panic!("Expected NewMessage, got: {:?}", other),
    }

    // The in-process hub loops the publish back to inst-1; the origin filter
    // must drop it instead of broadcasting a second copy.
    let extra = tokio::time::timeout(Duration::from_millis(500), ws_bob.next()).await;
    assert!(extra.is_err(), "Duplicate delivery from broker echo");
}

#[tokio::test]
async fn broker_absence_degrades_to_local_only_delivery() {
    let inst = start_instance("solo", None, None).await;

    let alice = inst.seed_member("alice", "Alice", "t1");
    let bob = inst.seed_member("bob", "Bob", "t1");

    let mut ws_alice = inst.connect("t1", &alice).await;
    let mut ws_bob = inst.connect("t1", &bob).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Publish fails (no broker), local members still get the message
    ws_alice.send(send_message_frame("hello?")).await.unwrap();

    match expect_event_payload(&mut ws_bob).await {
        event::Payload::NewMessage(envelope) => assert_eq!(envelope.body, "hello?"),
        other => panic!("Expected NewMessage, got: {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(inst.logged_message_count(), 1);
}

struct FailingLog;

#[async_trait]
impl MessageLog for FailingLog {
    async fn append(&self, _envelope: &huddle_server::proto::MessageEnvelope) -> Result<(), LogError> {
        Err(LogError::Db("log store unavailable".to_string()))
    }
}

#[tokio::test]
async fn log_append_failure_does_not_block_delivery() {
    let inst = start_instance("solo", None, Some(Arc::new(FailingLog))).await;

    let alice = inst.seed_member("alice", "Alice", "t1");
    let bob = inst.seed_member("bob", "Bob", "t1");

    let mut ws_alice = inst.connect("t1", &alice).await;
    let mut ws_bob = inst.connect("t1", &bob).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    ws_alice.send(send_message_frame("best effort")).await.unwrap();

    match expect_event_payload(&mut ws_bob).await {
        event::Payload::NewMessage(envelope) => assert_eq!(envelope.body, "best effort"),
        other => panic!("Expected NewMessage, got: {:?}", other),
    }
}

#[tokio::test]
async fn user_notice_reaches_user_on_another_instance() {
    let broker = InMemoryBroker::new();
    let inst1 = start_instance("inst-1", Some(&broker), None).await;
    let inst2 = start_instance("inst-2", Some(&broker), None).await;

    let bob = inst2.seed_member("bob", "Bob", "t1");
    let mut ws_bob = inst2.connect("t1", &bob).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The surrounding product raises a notice on instance 1; Bob is only
    // connected to instance 2.
    fanout::dispatch_user_notice(
        &inst1.state,
        UserNotice {
            id: "n1".to_string(),
            tenant_id: "acme".to_string(),
            user_id: "bob".to_string(),
            kind: "ticket:assigned".to_string(),
            body: "Ticket #4012 assigned to you".to_string(),
            created_at_ms: 1,
        },
    );

    match expect_event_payload(&mut ws_bob).await {
        event::Payload::Notice(notice) => {
            assert_eq!(notice.id, "n1");
            assert_eq!(notice.kind, "ticket:assigned");
        }
        other => panic!("Expected Notice, got: {:?}", other),
    }
}

#[tokio::test]
async fn user_notice_for_disconnected_user_is_a_silent_noop() {
    let broker = InMemoryBroker::new();
    let inst1 = start_instance("inst-1", Some(&broker), None).await;

    fanout::dispatch_user_notice(
        &inst1.state,
        UserNotice {
            id: "n2".to_string(),
            tenant_id: "acme".to_string(),
            user_id: "nobody".to_string(),
            kind: "ticket:assigned".to_string(),
            body: "unread".to_string(),
            created_at_ms: 1,
        },
    );

    // Nothing to assert beyond "no panic, no delivery anywhere"
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(inst1.state.registry.connection_count(), 0);
}
