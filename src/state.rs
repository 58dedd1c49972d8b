//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! owns everything the relay knows: the room map, the process-wide price
//! table, live connections, and the two deadline maps (room idle cleanup,
//! player grace periods). Nothing lives in module globals, so tests build
//! a fresh state per case.
//!
//! LOCKING
//! =======
//! Rooms and prices sit behind separate `RwLock`s, always taken in that
//! order. Mutating handlers hold the rooms write lock for the whole
//! operation, including fan-out, so a room observes events in exactly the
//! order they were processed.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::event::Event;
use crate::timers::Deadlines;

/// Identifier assigned to each WebSocket connection on upgrade.
pub type ConnectionId = Uuid;

/// Symbol → amount held.
pub type Portfolio = BTreeMap<String, f64>;

/// Symbol → cumulative percentage change.
pub type ChangeMap = BTreeMap<String, f64>;

/// Maximum entries kept in each scan log.
pub const SCAN_LOG_CAPACITY: usize = 10;

/// Default starting cash when the host does not configure one.
pub const DEFAULT_STARTING_CASH: f64 = 10_000.0;

/// Default game duration in minutes.
pub const DEFAULT_GAME_DURATION: u32 = 10;

// =============================================================================
// SETTINGS
// =============================================================================

/// Market volatility chosen by the host. Scales the periodic tick range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Volatility {
    Low,
    High,
    #[default]
    #[serde(other)]
    Medium,
}

impl Volatility {
    #[must_use]
    pub fn factor(self) -> f64 {
        match self {
            Self::Low => 0.5,
            Self::Medium => 1.0,
            Self::High => 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub volatility: Volatility,
    /// Game length in minutes. Carried for clients; the server does not end games.
    pub game_duration: u32,
    pub starting_cash: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volatility: Volatility::Medium,
            game_duration: DEFAULT_GAME_DURATION,
            starting_cash: DEFAULT_STARTING_CASH,
        }
    }
}

impl Settings {
    /// Clamp client-supplied values into their valid ranges.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if !self.starting_cash.is_finite() || self.starting_cash < 0.0 {
            self.starting_cash = 0.0;
        }
        self
    }
}

// =============================================================================
// PLAYER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: ConnectionId,
    pub name: String,
    pub avatar: String,
    pub is_host: bool,
    pub portfolio: Portfolio,
    pub cash_balance: f64,
    pub portfolio_value: f64,
    pub total_value: f64,
    pub disconnected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<i64>,
    pub is_rejoining: bool,
    pub joined_at: i64,
}

impl Player {
    /// Whether this record carries the given display identity.
    #[must_use]
    pub fn has_identity(&self, name: &str, avatar: &str) -> bool {
        self.name == name && self.avatar == avatar
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// Room snapshot as broadcast in `lobby:update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: String,
    pub host_id: ConnectionId,
    pub host_name: String,
    pub host_avatar: String,
    /// A placeholder host may be replaced by the next `host:createRoom`.
    pub is_placeholder_host: bool,
    pub settings: Settings,
    /// Connection id → player. The host is included with `is_host = true`.
    pub players: HashMap<ConnectionId, Player>,
    /// Display/turn order of non-host players.
    pub player_order: Vec<ConnectionId>,
    pub started: bool,
    pub created_at: i64,
}

impl Room {
    /// Players other than the host.
    pub fn participants(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| !p.is_host)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants().count()
    }

    /// Find the record carrying a display identity, if any.
    #[must_use]
    pub fn find_by_identity(&self, name: &str, avatar: &str) -> Option<&Player> {
        self.players.values().find(|p| p.has_identity(name, avatar))
    }
}

// =============================================================================
// SCAN LOG
// =============================================================================

/// One audit entry in a room's scan/activity log. Display-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub player: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_value: Option<f64>,
}

/// Newest-first log bounded to [`SCAN_LOG_CAPACITY`] entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScanLog(VecDeque<ScanRecord>);

impl ScanLog {
    pub fn push(&mut self, record: ScanRecord) {
        self.0.push_front(record);
        self.0.truncate(SCAN_LOG_CAPACITY);
    }

    #[cfg(test)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &ScanRecord> {
        self.0.iter()
    }
}

// =============================================================================
// PRICE TABLE
// =============================================================================

/// Authoritative symbol → price table shared by every room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable(BTreeMap<String, f64>);

impl PriceTable {
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        Self(pairs.iter().map(|(s, p)| ((*s).to_string(), *p)).collect())
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.0.get(symbol).copied()
    }

    pub fn set(&mut self, symbol: &str, price: f64) {
        self.0.insert(symbol.to_string(), price);
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state: the broadcastable snapshot plus server-side
/// market ledger, logs, broadcast group, and ticker.
pub struct RoomState {
    pub room: Room,
    /// Cumulative percentage change per symbol for this room.
    pub change_24h: ChangeMap,
    pub auto_scan_actions: ScanLog,
    pub player_scan_actions: ScanLog,
    /// Broadcast group: connection id → sender for outgoing events.
    pub clients: HashMap<ConnectionId, mpsc::Sender<Event>>,
    /// Periodic market ticker, present once the game has started.
    pub ticker: Option<AbortHandle>,
}

impl RoomState {
    #[must_use]
    pub fn new(room: Room) -> Self {
        Self {
            room,
            change_24h: ChangeMap::new(),
            auto_scan_actions: ScanLog::default(),
            player_scan_actions: ScanLog::default(),
            clients: HashMap::new(),
            ticker: None,
        }
    }

    /// Send events to every connection in the room, in order.
    ///
    /// Best-effort: a connection whose channel is full or closed misses the
    /// events rather than stalling the room.
    pub fn fan_out(&self, events: &[Event]) {
        for tx in self.clients.values() {
            for event in events {
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

impl Drop for RoomState {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
    pub prices: Arc<RwLock<PriceTable>>,
    /// Every live WebSocket connection, joined to a room or not.
    pub connections: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<Event>>>>,
    /// Pending deletions of rooms without participants, keyed by room code.
    pub idle_timers: Deadlines<String>,
    /// Pending evictions of disconnected players, keyed by room code and
    /// the connection id the player was last seen on.
    pub grace_timers: Deadlines<(String, ConnectionId)>,
    pub started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            prices: Arc::new(RwLock::new(PriceTable::from_pairs(&crate::services::market::INITIAL_PRICES))),
            connections: Arc::new(RwLock::new(HashMap::new())),
            idle_timers: Deadlines::new(),
            grace_timers: Deadlines::new(),
            started_at: Instant::now(),
        }
    }

    /// Stop every timer and ticker and drop all rooms.
    pub async fn shutdown(&self) {
        if !self.idle_timers.is_empty() || !self.grace_timers.is_empty() {
            tracing::info!(
                idle = self.idle_timers.len(),
                grace = self.grace_timers.len(),
                "cancelling pending timers"
            );
        }
        self.idle_timers.cancel_all();
        self.grace_timers.cancel_all();
        let mut rooms = self.rooms.write().await;
        let count = rooms.len();
        rooms.clear();
        tracing::info!(rooms = count, "state shut down");
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
