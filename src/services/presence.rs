//! Session and presence — joins, rejoins, disconnects, grace expiry.
//!
//! DESIGN
//! ======
//! A player is identified across reconnects by `(name, avatar)`. When a
//! socket closes, its player record is kept but marked disconnected and a
//! grace timer is armed. A join carrying the same identity before the timer
//! fires takes the record over: holdings and cash survive, the record moves
//! to the new connection id, and its `player_order` slot is preserved.
//!
//! A second join with the identity of a player who is still connected is a
//! name collision, not a rejoin.
//!
//! The host is not a participant. When the host's socket closes the whole
//! room is deleted without a grace period.
//!
//! ERROR HANDLING
//! ==============
//! Join failures are returned as [`JoinError`] before any mutation, and the
//! WebSocket layer turns them into a `player:joinError` string for the
//! joining socket only.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::event::{ErrorCode, Event, now_ms};
use crate::protocol::{self, ScanData};
use crate::services::market::{self, MarketSnapshot, round_cents};
use crate::services::{reconcile, registry};
use crate::state::{AppState, ConnectionId, Player, Portfolio, PriceTable, Room, RoomState};

/// Holdings every new player starts with, on top of the room's starting cash.
pub const STARTER_PORTFOLIO: [(&str, f64); 3] = [("BTC", 0.01), ("ETH", 0.1), ("SOL", 1.0)];

#[must_use]
pub fn starter_portfolio() -> Portfolio {
    STARTER_PORTFOLIO.iter().map(|(s, a)| ((*s).to_string(), *a)).collect()
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Player name is required")]
    MissingName,
    #[error("Room {0} not found")]
    RoomNotFound(String),
    #[error("Game has already started")]
    GameStarted,
    #[error("Name {0} is already taken in this room")]
    NameInUse(String),
    #[error("The host cannot join its own room as a player")]
    HostCannotJoin,
}

impl ErrorCode for JoinError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingName => "E_NAME_REQUIRED",
            Self::RoomNotFound(_) => "E_ROOM_NOT_FOUND",
            Self::GameStarted => "E_GAME_STARTED",
            Self::NameInUse(_) => "E_NAME_IN_USE",
            Self::HostCannotJoin => "E_HOST_CANNOT_JOIN",
        }
    }
}

/// Everything the joining socket needs to render the room.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub room: Room,
    pub player: Player,
    pub is_rejoining: bool,
    pub market: MarketSnapshot,
    pub scan_data: ScanData,
}

impl JoinOutcome {
    /// Direct replies for the joining socket, in delivery order.
    #[must_use]
    pub fn replies(&self) -> Vec<Event> {
        vec![
            protocol::join_success(&self.room),
            protocol::price_update(&self.market.prices),
            protocol::market_state_update(&self.market.change_24h),
            protocol::scan_data_update(&self.scan_data.auto_scan_actions, &self.scan_data.player_scan_actions),
        ]
    }
}

// =============================================================================
// JOIN
// =============================================================================

/// Join a room, or rejoin it as a disconnected player with the same identity.
///
/// # Errors
///
/// Returns [`JoinError`] without touching the room when the join is refused.
pub async fn join(
    state: &AppState,
    room_code: &str,
    player_name: &str,
    player_avatar: &str,
    connection_id: ConnectionId,
    tx: mpsc::Sender<Event>,
) -> Result<JoinOutcome, JoinError> {
    let player_name = player_name.trim();
    if player_name.is_empty() {
        return Err(JoinError::MissingName);
    }

    let mut rooms = state.rooms.write().await;
    let room_state = rooms
        .get_mut(room_code)
        .ok_or_else(|| JoinError::RoomNotFound(room_code.to_string()))?;
    let prices = state.prices.read().await;

    if let Some(existing) = room_state.room.players.get(&connection_id) {
        if existing.is_host {
            return Err(JoinError::HostCannotJoin);
        }
        // Same socket joining again: refresh its membership, nothing else.
        let player = existing.clone();
        room_state.clients.insert(connection_id, tx);
        return Ok(outcome(room_state, player, false, &prices));
    }

    let existing = room_state
        .room
        .find_by_identity(player_name, player_avatar)
        .map(|p| (p.id, p.disconnected));

    let is_rejoining = match existing {
        Some((_, false)) => {
            warn!(%room_code, %player_name, "join refused: name in use");
            return Err(JoinError::NameInUse(player_name.to_string()));
        }
        Some((previous_id, true)) => {
            take_over_record(&mut room_state.room, previous_id, connection_id);
            let grace_key = (room_code.to_string(), previous_id);
            let grace_left = state.grace_timers.deadline(&grace_key).map(|d| d.saturating_duration_since(Instant::now()));
            state.grace_timers.cancel(&grace_key);
            info!(%room_code, %player_name, %previous_id, %connection_id, ?grace_left, "player rejoined");
            true
        }
        None if room_state.room.started => {
            warn!(%room_code, %player_name, "join refused: game already started");
            return Err(JoinError::GameStarted);
        }
        None => {
            let portfolio = starter_portfolio();
            let portfolio_value = reconcile::portfolio_value(&prices, &portfolio);
            let cash_balance = room_state.room.settings.starting_cash;
            let player = Player {
                id: connection_id,
                name: player_name.to_string(),
                avatar: player_avatar.to_string(),
                is_host: false,
                portfolio,
                cash_balance,
                portfolio_value,
                total_value: round_cents(portfolio_value + cash_balance),
                disconnected: false,
                disconnected_at: None,
                is_rejoining: false,
                joined_at: now_ms(),
            };
            room_state.room.players.insert(connection_id, player);
            room_state.room.player_order.push(connection_id);
            info!(%room_code, %player_name, %connection_id, players = room_state.room.participant_count(), "player joined");
            false
        }
    };

    room_state.clients.insert(connection_id, tx);
    registry::cancel_idle_cleanup(state, room_code);

    let Some(player) = room_state.room.players.get(&connection_id).cloned() else {
        return Err(JoinError::RoomNotFound(room_code.to_string()));
    };
    room_state.fan_out(&[
        protocol::lobby_update(&room_state.room),
        protocol::join_notification(&player.name, &player.avatar, is_rejoining),
    ]);
    Ok(outcome(room_state, player, is_rejoining, &prices))
}

/// Move a disconnected record onto a new connection id, keeping its
/// holdings and its place in `player_order`.
fn take_over_record(room: &mut Room, previous_id: ConnectionId, connection_id: ConnectionId) {
    let Some(mut player) = room.players.remove(&previous_id) else {
        return;
    };
    player.id = connection_id;
    player.disconnected = false;
    player.disconnected_at = None;
    player.is_rejoining = true;
    room.players.insert(connection_id, player);

    for id in &mut room.player_order {
        if *id == previous_id {
            *id = connection_id;
        }
    }
}

fn outcome(room_state: &RoomState, player: Player, is_rejoining: bool, prices: &PriceTable) -> JoinOutcome {
    JoinOutcome {
        room: room_state.room.clone(),
        player,
        is_rejoining,
        market: MarketSnapshot { prices: prices.clone(), change_24h: room_state.change_24h.clone() },
        scan_data: market::scan_data_of(room_state),
    }
}

// =============================================================================
// DISCONNECT
// =============================================================================

/// Handle a closed socket: leave every room it belongs to.
pub async fn handle_disconnect(state: &AppState, connection_id: ConnectionId) {
    let codes: Vec<String> = {
        let rooms = state.rooms.read().await;
        rooms
            .iter()
            .filter(|(_, rs)| rs.clients.contains_key(&connection_id) || rs.room.players.contains_key(&connection_id))
            .map(|(code, _)| code.clone())
            .collect()
    };
    for room_code in codes {
        leave_room(state, &room_code, connection_id).await;
    }
}

/// Remove a connection from one room. A host leaving deletes the room; a
/// player leaving is marked disconnected and given a grace period.
pub async fn leave_room(state: &AppState, room_code: &str, connection_id: ConnectionId) {
    let mut rooms = state.rooms.write().await;
    let Some(room_state) = rooms.get_mut(room_code) else {
        return;
    };

    if room_state.room.host_id == connection_id {
        info!(%room_code, %connection_id, "host disconnected, closing room");
        registry::remove_room_locked(state, &mut rooms, room_code);
        return;
    }

    room_state.clients.remove(&connection_id);
    let Some(player) = room_state.room.players.get_mut(&connection_id) else {
        return;
    };
    player.disconnected = true;
    player.disconnected_at = Some(now_ms());
    info!(%room_code, player = %player.name, %connection_id, grace = ?state.config.player_grace_period, "player disconnected");

    room_state.fan_out(&[protocol::lobby_update(&room_state.room)]);
    schedule_grace_expiry(state, room_code, connection_id);
}

fn schedule_grace_expiry(state: &AppState, room_code: &str, connection_id: ConnectionId) {
    let task_state = state.clone();
    let task_code = room_code.to_string();
    state.grace_timers.schedule(
        (room_code.to_string(), connection_id),
        state.config.player_grace_period,
        async move {
            expire_grace(&task_state, &task_code, connection_id).await;
        },
    );
}

/// Drop a player whose grace period ran out, if they are still disconnected.
pub(crate) async fn expire_grace(state: &AppState, room_code: &str, connection_id: ConnectionId) {
    let mut rooms = state.rooms.write().await;
    let Some(room_state) = rooms.get_mut(room_code) else {
        return;
    };
    match room_state.room.players.get(&connection_id) {
        Some(player) if player.disconnected && !player.is_host => {}
        _ => return,
    }

    if let Some(player) = room_state.room.players.remove(&connection_id) {
        info!(%room_code, player = %player.name, "grace period expired, player removed");
    }
    room_state.room.player_order.retain(|id| *id != connection_id);
    room_state.fan_out(&[protocol::lobby_update(&room_state.room)]);

    if room_state.room.participant_count() == 0 {
        registry::schedule_idle_cleanup(state, room_code);
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
