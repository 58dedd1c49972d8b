//! Room-scoped broadcast fan-out.
//!
//! Services that already hold the rooms lock use `RoomState::fan_out`
//! directly; these helpers take their own read lock and are meant for
//! callers that do not.

use tracing::debug;

use crate::event::Event;
use crate::state::{AppState, ConnectionId};

/// Broadcast events to every connection in a room, optionally excluding one.
pub async fn to_room(state: &AppState, room_code: &str, events: &[Event], exclude: Option<ConnectionId>) {
    let rooms = state.rooms.read().await;
    let Some(room_state) = rooms.get(room_code) else {
        debug!(%room_code, "broadcast to unknown room dropped");
        return;
    };

    for (connection_id, tx) in &room_state.clients {
        if exclude == Some(*connection_id) {
            continue;
        }
        for event in events {
            // Best-effort: if a client's channel is full, skip it.
            let _ = tx.try_send(event.clone());
        }
    }
}

/// Number of live connections.
pub async fn connection_count(state: &AppState) -> usize {
    state.connections.read().await.len()
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
