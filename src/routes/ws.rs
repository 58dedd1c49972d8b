//! WebSocket handler — bidirectional event relay.
//!
//! DESIGN
//! ======
//! On upgrade, assigns a connection id and enters a `select!` loop:
//! - Incoming client envelopes → decode into `ClientEvent` + dispatch
//! - Room fan-out events → forward to client
//!
//! Services mutate state and fan out to rooms themselves. Dispatch only
//! returns the events meant for the sending socket (success replies,
//! `*Error` strings, check/verify answers), which are written before any
//! queued fan-out so a joiner sees `player:joinSuccess` first.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `connectionId`
//! 2. Client sends envelopes → dispatch → direct replies
//! 3. Close → presence disconnect (host closes room, player gets grace)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{ErrorCode, Event};
use crate::protocol::{self, ClientEvent, ProtocolError};
use crate::services::registry::HostIdentity;
use crate::services::{broadcast, market, presence, reconcile, registry};
use crate::state::{AppState, ConnectionId};

/// Outgoing queue depth per connection. Fan-out drops events beyond this.
pub const CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Per-connection dispatch context.
#[derive(Debug, Default)]
struct Session {
    /// Room this socket last created or joined.
    room: Option<String>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();

    // Per-connection channel for room fan-out.
    let (client_tx, mut client_rx) = mpsc::channel::<Event>(CLIENT_CHANNEL_CAPACITY);
    state.connections.write().await.insert(connection_id, client_tx.clone());

    if send_event(&mut socket, connection_id, &protocol::session_connected(connection_id))
        .await
        .is_err()
    {
        state.connections.write().await.remove(&connection_id);
        return;
    }

    info!(%connection_id, "ws: client connected");

    let mut session = Session::default();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut session, connection_id, &client_tx, text.as_str()).await;
                        for event in replies {
                            let _ = send_event(&mut socket, connection_id, &event).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = client_rx.recv() => {
                if send_event(&mut socket, connection_id, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    presence::handle_disconnect(&state, connection_id).await;
    state.connections.write().await.remove(&connection_id);
    info!(%connection_id, "ws: client disconnected");
}

async fn send_event(socket: &mut WebSocket, connection_id: ConnectionId, event: &Event) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(%connection_id, event = %event.event, error = %e, "ws: failed to serialize event");
            return Ok(());
        }
    };

    if event.is_error() {
        warn!(%connection_id, event = %event.event, data = %event.data, "ws: send error");
    } else {
        debug!(%connection_id, event = %event.event, "ws: send event");
    }
    socket.send(Message::Text(json.into())).await
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Decode and process one inbound text frame and return events for the sender.
///
/// Kept separate from the socket so tests can drive dispatch with plain
/// channels.
async fn process_inbound_text(
    state: &AppState,
    session: &mut Session,
    connection_id: ConnectionId,
    client_tx: &mpsc::Sender<Event>,
    text: &str,
) -> Vec<Event> {
    let event = match ClientEvent::parse(text) {
        Ok(event) => event,
        Err(ProtocolError::InvalidJson(e)) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            return vec![protocol::gateway_error(&format!("invalid json: {e}"))];
        }
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: inbound event dropped");
            return Vec::new();
        }
    };

    info!(%connection_id, event = event.name(), "ws: recv event");
    dispatch(state, session, connection_id, client_tx, event).await
}

async fn dispatch(
    state: &AppState,
    session: &mut Session,
    connection_id: ConnectionId,
    client_tx: &mpsc::Sender<Event>,
    event: ClientEvent,
) -> Vec<Event> {
    match event {
        ClientEvent::CreateRoom(req) => {
            let host = HostIdentity::new(connection_id, &req.host_name, &req.host_avatar, req.is_placeholder);
            match registry::create_or_takeover(state, &req.room_code, host, req.settings, client_tx.clone()).await {
                Ok(room) => {
                    switch_room(state, session, connection_id, &room.code).await;
                    vec![protocol::create_success(&room)]
                }
                Err(e) => {
                    warn!(%connection_id, code = e.error_code(), error = %e, "ws: create room refused");
                    vec![Event::error(protocol::HOST_CREATE_ERROR, &e)]
                }
            }
        }
        ClientEvent::CheckRoom(req) => {
            let check = registry::check_room(state, &req.room_code).await;
            vec![protocol::room_check_response(&check)]
        }
        ClientEvent::StartGame(req) => {
            if let Err(e) = registry::start_game(state, &req.room_code, connection_id).await {
                warn!(%connection_id, code = e.error_code(), error = %e, "ws: start game ignored");
            }
            Vec::new()
        }
        ClientEvent::UpdateSettings(req) => {
            if let Err(e) = registry::update_settings(state, &req.room_code, connection_id, req.settings).await {
                warn!(%connection_id, code = e.error_code(), error = %e, "ws: settings update ignored");
            }
            Vec::new()
        }
        ClientEvent::ReorderPlayers(req) => {
            if let Err(e) = registry::reorder_players(state, &req.room_code, connection_id, req.player_order).await {
                warn!(%connection_id, code = e.error_code(), error = %e, "ws: reorder ignored");
            }
            Vec::new()
        }
        ClientEvent::Join(req) => {
            match presence::join(
                state,
                &req.room_code,
                &req.player_name,
                &req.player_avatar,
                connection_id,
                client_tx.clone(),
            )
            .await
            {
                Ok(outcome) => {
                    switch_room(state, session, connection_id, &outcome.room.code).await;
                    outcome.replies()
                }
                Err(e) => {
                    warn!(%connection_id, code = e.error_code(), error = %e, "ws: join refused");
                    vec![Event::error(protocol::PLAYER_JOIN_ERROR, &e)]
                }
            }
        }
        ClientEvent::ScanAction(req) => {
            market::apply_scan_effect(state, &req.room_code, req.scan_action).await;
            Vec::new()
        }
        ClientEvent::UpdateData(req) => {
            if let Err(e) = reconcile::reconcile(state, &req.room_code, connection_id, req.player_data).await {
                warn!(%connection_id, code = e.error_code(), error = %e, "ws: player data dropped");
            }
            Vec::new()
        }
        ClientEvent::SyncMarketState(req) => {
            market::merge_dashboard_baseline(state, &req.room_code, connection_id, req.change_map).await;
            Vec::new()
        }
        ClientEvent::RequestRefresh(req) => refresh(state, &req.room_code).await,
        ClientEvent::TestMessage(req) => {
            let event = protocol::test_message_received(&req.message, &req.sender, &req.room_code);
            broadcast::to_room(state, &req.room_code, &[event], None).await;
            Vec::new()
        }
        ClientEvent::ScanDataRequest(req) => match market::scan_data(state, &req.room_code).await {
            Some(data) => vec![protocol::scan_data_update(&data.auto_scan_actions, &data.player_scan_actions)],
            None => {
                warn!(%connection_id, room_code = %req.room_code, "ws: scan data for unknown room");
                Vec::new()
            }
        },
        ClientEvent::Verify(req) => {
            let result = registry::verify(state, &req.room_code, connection_id, &req.player_name).await;
            vec![protocol::verification_result(&result)]
        }
    }
}

/// Record the room this socket now belongs to, leaving the previous one
/// if it differs. Only called once the new membership has been accepted.
async fn switch_room(state: &AppState, session: &mut Session, connection_id: ConnectionId, room_code: &str) {
    let Some(previous) = session.room.replace(room_code.to_string()) else {
        return;
    };
    if previous == room_code {
        return;
    }
    info!(%connection_id, from = %previous, to = %room_code, "ws: switching rooms");
    presence::leave_room(state, &previous, connection_id).await;
}

/// Full dashboard resync: lobby, prices, ledger, and logs.
async fn refresh(state: &AppState, room_code: &str) -> Vec<Event> {
    let Some(room) = registry::get(state, room_code).await else {
        warn!(%room_code, "ws: refresh for unknown room");
        return Vec::new();
    };
    let (Some(snapshot), Some(scan_data)) =
        (market::snapshot(state, room_code).await, market::scan_data(state, room_code).await)
    else {
        return Vec::new();
    };
    vec![
        protocol::lobby_update(&room),
        protocol::price_update(&snapshot.prices),
        protocol::market_state_update(&snapshot.change_24h),
        protocol::scan_data_update(&scan_data.auto_scan_actions, &scan_data.player_scan_actions),
    ]
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
