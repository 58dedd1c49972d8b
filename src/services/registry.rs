//! Room registry — creation, host takeover, lifecycle, and host controls.
//!
//! DESIGN
//! ======
//! Rooms are keyed by a client-chosen code. The first `host:createRoom` for
//! a code creates the room; later ones either re-confirm the same host,
//! replace a placeholder host, or fail with a conflict naming the host.
//!
//! The host is stored in `players` with `is_host = true` so lobby snapshots
//! carry it, but it never counts as a participant. A room with no
//! participants has an idle deletion pending; any join cancels it.
//!
//! Deleting a room drops its `RoomState`, which aborts the market ticker,
//! and cancels the grace timers of its disconnected players.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::event::{ErrorCode, Event, now_ms};
use crate::protocol::{self, RoomCheck, VerificationResult};
use crate::services::market;
use crate::state::{AppState, ConnectionId, Player, Portfolio, Room, RoomState, Settings};

/// Host names that legacy clients auto-generate for throwaway dashboards.
pub const PLACEHOLDER_HOST_NAMES: [&str; 2] = ["Test Host", "Host"];

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room code is required")]
    MissingCode,
    #[error("Room {0} not found")]
    NotFound(String),
    #[error("Room {code} already has a host: {host_name}")]
    HostConflict { code: String, host_name: String },
    #[error("Only the host can {0}")]
    NotHost(&'static str),
    #[error("Game in room {0} has already started")]
    AlreadyStarted(String),
    #[error("Player order must list every player exactly once")]
    InvalidOrder,
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCode => "E_ROOM_CODE_REQUIRED",
            Self::NotFound(_) => "E_ROOM_NOT_FOUND",
            Self::HostConflict { .. } => "E_HOST_CONFLICT",
            Self::NotHost(_) => "E_NOT_HOST",
            Self::AlreadyStarted(_) => "E_GAME_STARTED",
            Self::InvalidOrder => "E_INVALID_ORDER",
        }
    }
}

/// Who is asking to host a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub connection_id: ConnectionId,
    pub name: String,
    pub avatar: String,
    pub is_placeholder: bool,
}

impl HostIdentity {
    /// Build a host identity. Without an explicit flag, the legacy
    /// placeholder names mark the host as replaceable.
    #[must_use]
    pub fn new(connection_id: ConnectionId, name: &str, avatar: &str, is_placeholder: Option<bool>) -> Self {
        Self {
            connection_id,
            name: name.to_string(),
            avatar: avatar.to_string(),
            is_placeholder: is_placeholder.unwrap_or_else(|| is_placeholder_name(name)),
        }
    }
}

#[must_use]
pub fn is_placeholder_name(name: &str) -> bool {
    PLACEHOLDER_HOST_NAMES.contains(&name.trim())
}

fn host_player(host: &HostIdentity) -> Player {
    Player {
        id: host.connection_id,
        name: host.name.clone(),
        avatar: host.avatar.clone(),
        is_host: true,
        portfolio: Portfolio::new(),
        cash_balance: 0.0,
        portfolio_value: 0.0,
        total_value: 0.0,
        disconnected: false,
        disconnected_at: None,
        is_rejoining: false,
        joined_at: now_ms(),
    }
}

fn install_host(room: &mut Room, host: &HostIdentity) {
    room.host_id = host.connection_id;
    room.host_name.clone_from(&host.name);
    room.host_avatar.clone_from(&host.avatar);
    room.is_placeholder_host = host.is_placeholder;
    room.players.insert(host.connection_id, host_player(host));
}

// =============================================================================
// CREATE / TAKEOVER
// =============================================================================

/// Create a room, or take over one whose host is a placeholder.
///
/// # Errors
///
/// Returns [`RoomError::MissingCode`] for a blank code and
/// [`RoomError::HostConflict`] when a real host already owns the room.
pub async fn create_or_takeover(
    state: &AppState,
    room_code: &str,
    host: HostIdentity,
    settings: Settings,
    tx: mpsc::Sender<Event>,
) -> Result<Room, RoomError> {
    if room_code.trim().is_empty() {
        return Err(RoomError::MissingCode);
    }

    let mut rooms = state.rooms.write().await;
    if let Some(room_state) = rooms.get_mut(room_code) {
        if room_state.room.host_id == host.connection_id {
            room_state.clients.insert(host.connection_id, tx);
            return Ok(room_state.room.clone());
        }
        if !room_state.room.is_placeholder_host {
            warn!(%room_code, existing = %room_state.room.host_name, requested = %host.name, "host conflict");
            return Err(RoomError::HostConflict {
                code: room_code.to_string(),
                host_name: room_state.room.host_name.clone(),
            });
        }

        let previous = room_state.room.host_id;
        room_state.room.players.remove(&previous);
        room_state.clients.remove(&previous);
        install_host(&mut room_state.room, &host);
        if !room_state.room.started {
            room_state.room.settings = settings.sanitized();
        }
        room_state.clients.insert(host.connection_id, tx);
        info!(%room_code, %previous, host = %host.name, "placeholder host replaced");

        room_state.fan_out(&[protocol::lobby_update(&room_state.room)]);
        return Ok(room_state.room.clone());
    }

    let change_24h = market::fresh_ledger(&*state.prices.read().await);
    let mut room = Room {
        code: room_code.to_string(),
        host_id: host.connection_id,
        host_name: String::new(),
        host_avatar: String::new(),
        is_placeholder_host: false,
        settings: settings.sanitized(),
        players: HashMap::new(),
        player_order: Vec::new(),
        started: false,
        created_at: now_ms(),
    };
    install_host(&mut room, &host);

    let mut room_state = RoomState::new(room);
    room_state.change_24h = change_24h;
    room_state.clients.insert(host.connection_id, tx);
    let snapshot = room_state.room.clone();
    rooms.insert(room_code.to_string(), room_state);
    info!(%room_code, host = %host.name, placeholder = host.is_placeholder, rooms = rooms.len(), "room created");

    schedule_idle_cleanup(state, room_code);
    Ok(snapshot)
}

// =============================================================================
// LOOKUP
// =============================================================================

/// Snapshot of a room, if it exists.
pub async fn get(state: &AppState, room_code: &str) -> Option<Room> {
    state.rooms.read().await.get(room_code).map(|rs| rs.room.clone())
}

pub async fn room_count(state: &AppState) -> usize {
    state.rooms.read().await.len()
}

/// Answer `host:checkRoom`.
pub async fn check_room(state: &AppState, room_code: &str) -> RoomCheck {
    let rooms = state.rooms.read().await;
    match rooms.get(room_code) {
        None => RoomCheck { has_host: false, host_name: None, allow_takeover: None },
        Some(room_state) => RoomCheck {
            has_host: true,
            host_name: Some(room_state.room.host_name.clone()),
            allow_takeover: Some(room_state.room.is_placeholder_host),
        },
    }
}

/// Answer `room:verify`: what the server believes about this connection
/// and name in the room.
pub async fn verify(
    state: &AppState,
    room_code: &str,
    connection_id: ConnectionId,
    player_name: &str,
) -> VerificationResult {
    let rooms = state.rooms.read().await;
    let Some(room_state) = rooms.get(room_code) else {
        return VerificationResult {
            room_exists: false,
            player_in_room: false,
            socket_in_room: false,
            players_count: 0,
            socket_ids: Vec::new(),
            actual_sockets_in_room: Vec::new(),
            room_data: None,
        };
    };

    let room = &room_state.room;
    VerificationResult {
        room_exists: true,
        player_in_room: room.players.values().any(|p| p.name == player_name),
        socket_in_room: room_state.clients.contains_key(&connection_id),
        players_count: room.players.len(),
        socket_ids: room.players.keys().copied().collect(),
        actual_sockets_in_room: room_state.clients.keys().copied().collect(),
        room_data: Some(room.clone()),
    }
}

// =============================================================================
// DELETE / IDLE CLEANUP
// =============================================================================

/// Delete a room. Returns whether it existed.
#[cfg(test)]
pub async fn delete(state: &AppState, room_code: &str) -> bool {
    let mut rooms = state.rooms.write().await;
    remove_room_locked(state, &mut rooms, room_code)
}

/// Remove a room from an already-locked room map.
pub(crate) fn remove_room_locked(state: &AppState, rooms: &mut HashMap<String, RoomState>, room_code: &str) -> bool {
    let Some(room_state) = rooms.remove(room_code) else {
        return false;
    };
    state.idle_timers.cancel(&room_code.to_string());
    for player in room_state.room.players.values() {
        state.grace_timers.cancel(&(room_code.to_string(), player.id));
    }
    info!(%room_code, rooms = rooms.len(), "room deleted");
    true
}

/// Schedule deletion of a room after the idle timeout.
pub fn schedule_idle_cleanup(state: &AppState, room_code: &str) {
    let task_state = state.clone();
    let task_code = room_code.to_string();
    state.idle_timers.schedule(room_code.to_string(), state.config.room_idle_timeout, async move {
        delete_if_idle(&task_state, &task_code).await;
    });
    info!(%room_code, timeout = ?state.config.room_idle_timeout, "idle cleanup scheduled");
}

/// Cancel a pending idle deletion. Returns whether one was pending.
pub fn cancel_idle_cleanup(state: &AppState, room_code: &str) -> bool {
    state.idle_timers.cancel(&room_code.to_string())
}

async fn delete_if_idle(state: &AppState, room_code: &str) {
    let mut rooms = state.rooms.write().await;
    let Some(room_state) = rooms.get(room_code) else {
        return;
    };
    if room_state.room.participant_count() > 0 {
        info!(%room_code, "idle cleanup skipped: room has players");
        return;
    }
    info!(%room_code, "idle room expired");
    remove_room_locked(state, &mut rooms, room_code);
}

// =============================================================================
// HOST CONTROLS
// =============================================================================

/// Start the game. Returns `false` if it had already started.
///
/// # Errors
///
/// Returns [`RoomError::NotFound`] or [`RoomError::NotHost`].
pub async fn start_game(state: &AppState, room_code: &str, connection_id: ConnectionId) -> Result<bool, RoomError> {
    let mut rooms = state.rooms.write().await;
    let room_state = rooms
        .get_mut(room_code)
        .ok_or_else(|| RoomError::NotFound(room_code.to_string()))?;
    if room_state.room.host_id != connection_id {
        return Err(RoomError::NotHost("start the game"));
    }
    if room_state.room.started {
        return Ok(false);
    }

    room_state.room.started = true;
    let ticker = market::spawn_ticker(state.clone(), room_code.to_string());
    room_state.ticker = Some(ticker.abort_handle());
    info!(%room_code, players = room_state.room.participant_count(), "game started");

    room_state.fan_out(&[protocol::game_started(&room_state.room), protocol::lobby_update(&room_state.room)]);
    Ok(true)
}

/// Replace the room settings before the game starts.
///
/// # Errors
///
/// Returns [`RoomError::NotFound`], [`RoomError::NotHost`], or
/// [`RoomError::AlreadyStarted`].
pub async fn update_settings(
    state: &AppState,
    room_code: &str,
    connection_id: ConnectionId,
    settings: Settings,
) -> Result<Room, RoomError> {
    let mut rooms = state.rooms.write().await;
    let room_state = rooms
        .get_mut(room_code)
        .ok_or_else(|| RoomError::NotFound(room_code.to_string()))?;
    if room_state.room.host_id != connection_id {
        return Err(RoomError::NotHost("change settings"));
    }
    if room_state.room.started {
        return Err(RoomError::AlreadyStarted(room_code.to_string()));
    }

    room_state.room.settings = settings.sanitized();
    info!(%room_code, settings = ?room_state.room.settings, "settings updated");
    room_state.fan_out(&[protocol::lobby_update(&room_state.room)]);
    Ok(room_state.room.clone())
}

/// Replace the player display order. The new order must be a permutation
/// of the current participants.
///
/// # Errors
///
/// Returns [`RoomError::NotFound`], [`RoomError::NotHost`], or
/// [`RoomError::InvalidOrder`].
pub async fn reorder_players(
    state: &AppState,
    room_code: &str,
    connection_id: ConnectionId,
    order: Vec<ConnectionId>,
) -> Result<Room, RoomError> {
    let mut rooms = state.rooms.write().await;
    let room_state = rooms
        .get_mut(room_code)
        .ok_or_else(|| RoomError::NotFound(room_code.to_string()))?;
    if room_state.room.host_id != connection_id {
        return Err(RoomError::NotHost("reorder players"));
    }

    let current: HashSet<ConnectionId> = room_state.room.player_order.iter().copied().collect();
    let proposed: HashSet<ConnectionId> = order.iter().copied().collect();
    if order.len() != current.len() || proposed != current {
        return Err(RoomError::InvalidOrder);
    }

    room_state.room.player_order = order;
    info!(%room_code, "player order updated");
    room_state.fan_out(&[protocol::lobby_update(&room_state.room)]);
    Ok(room_state.room.clone())
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
