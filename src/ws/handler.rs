use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use tokio::time::timeout;

use crate::state::AppState;
use crate::ws::actor;
use crate::ws::handshake::Handshake;

/// Query parameters for a WebSocket connection request. Both are optional at
/// the extractor level so their absence yields a proper close code instead of
/// an HTTP 400 before the upgrade.
#[derive(Debug, Deserialize)]
pub struct WsConnectQuery {
    /// Target team identifier.
    pub team: Option<String>,
    /// Bearer credential minted by the identity service.
    pub token: Option<String>,
}

/// Close code for a handshake that exceeded the configured window.
const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4008;

/// GET /ws?team=TEAM&token=CREDENTIAL
///
/// WebSocket upgrade endpoint. The whole admission sequence — credential
/// verification, membership check — runs under the handshake timeout before
/// the upgrade completes; a socket is never registered half-admitted. On any
/// rejection the connection is upgraded and then immediately closed with the
/// rejection's close code, so clients get a reason instead of a dropped TCP
/// stream.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let mut handshake = Handshake::new();

    let admission = timeout(state.handshake_timeout, async {
        handshake
            .authenticate(state.identity_gate.as_ref(), params.token.as_deref())
            .await?;
        handshake
            .admit(state.membership.as_ref(), params.team.as_deref())
            .await
    })
    .await;

    match admission {
        Ok(Ok(())) => {
            let identity = match handshake.open() {
                Ok(identity) => identity,
                Err(rejection) => {
                    // Unreachable after a successful admit; handled anyway so
                    // the state machine stays the single authority.
                    return close_after_upgrade(ws, rejection.close_code(), rejection.reason());
                }
            };
            // Admission checked `team` above; missing team can no longer occur.
            let team_id = params.team.unwrap_or_default();

            tracing::info!(
                user_id = %identity.user_id,
                tenant_id = %identity.tenant_id,
                team_id = %team_id,
                "WebSocket connection admitted"
            );

            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity, team_id))
        }
        Ok(Err(rejection)) => {
            tracing::warn!(
                close_code = rejection.close_code(),
                reason = rejection.reason(),
                "WebSocket handshake rejected"
            );
            close_after_upgrade(ws, rejection.close_code(), rejection.reason())
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = state.handshake_timeout.as_secs(),
                "WebSocket handshake timed out"
            );
            close_after_upgrade(ws, CLOSE_HANDSHAKE_TIMEOUT, "handshake timeout")
        }
    }
}

/// Upgrade the connection, send a close frame with the given code, done.
/// The registry never saw this connection; there is nothing to clean up.
fn close_after_upgrade(ws: WebSocketUpgrade, close_code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let frame = CloseFrame {
            code: close_code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
    })
}
