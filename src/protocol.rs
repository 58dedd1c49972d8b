//! Typed wire protocol.
//!
//! ARCHITECTURE
//! ============
//! Inbound envelopes are decoded into [`ClientEvent`] at the WebSocket
//! boundary, one payload struct per event name. Anything that does not
//! decode is rejected before it reaches a service. Outbound events are
//! built through the constructor functions at the bottom of this module so
//! every event name and payload shape is defined in one place.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::{Event, now_ms};
use crate::services::reconcile::{ReconciledPlayer, ReportedPlayerData};
use crate::state::{ChangeMap, ConnectionId, PriceTable, Room, ScanLog, ScanRecord, Settings};

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const HOST_CREATE_ROOM: &str = "host:createRoom";
pub const HOST_CHECK_ROOM: &str = "host:checkRoom";
pub const HOST_START_GAME: &str = "host:startGame";
pub const HOST_UPDATE_SETTINGS: &str = "host:updateSettings";
pub const HOST_REORDER_PLAYERS: &str = "host:reorderPlayers";
pub const PLAYER_JOIN: &str = "player:join";
pub const PLAYER_SCAN_ACTION: &str = "player:scanAction";
pub const PLAYER_UPDATE_DATA: &str = "player:updateData";
pub const DASHBOARD_SYNC_MARKET_STATE: &str = "dashboard:syncMarketState";
pub const DASHBOARD_REQUEST_REFRESH: &str = "dashboard:requestRefresh";
pub const TEST_MESSAGE: &str = "test:message";
pub const SCAN_DATA_REQUEST: &str = "scanData:request";
pub const ROOM_VERIFY: &str = "room:verify";

pub const SESSION_CONNECTED: &str = "session:connected";
pub const GATEWAY_ERROR: &str = "gateway:error";
pub const HOST_CREATE_SUCCESS: &str = "host:createSuccess";
pub const HOST_CREATE_ERROR: &str = "host:createError";
pub const HOST_ROOM_CHECK_RESPONSE: &str = "host:roomCheckResponse";
pub const PLAYER_JOIN_SUCCESS: &str = "player:joinSuccess";
pub const PLAYER_JOIN_ERROR: &str = "player:joinError";
pub const LOBBY_UPDATE: &str = "lobby:update";
pub const GAME_STARTED: &str = "game:started";
pub const CRYPTO_PRICE_UPDATE: &str = "crypto:priceUpdate";
pub const CRYPTO_FORCE_RECALCULATION: &str = "crypto:forceRecalculation";
pub const MARKET_STATE_UPDATE: &str = "market:stateUpdate";
pub const SCAN_DATA_UPDATE: &str = "scanData:update";
pub const DASHBOARD_LIVE_PLAYER_UPDATE: &str = "dashboard:livePlayerUpdate";
pub const PLAYER_JOIN_NOTIFICATION: &str = "player:joinNotification";
pub const TEST_MESSAGE_RECEIVED: &str = "test:messageReceived";
pub const ROOM_VERIFICATION_RESULT: &str = "room:verificationResult";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// INBOUND PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_code: String,
    pub host_name: String,
    #[serde(default)]
    pub host_avatar: String,
    #[serde(default)]
    pub settings: Settings,
    /// Explicit placeholder flag. Absent means "infer from the host name".
    #[serde(default)]
    pub is_placeholder: Option<bool>,
}

/// Payload for events that only name a room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub room_code: String,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderPlayersRequest {
    pub room_code: String,
    pub player_order: Vec<ConnectionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_code: String,
    pub player_name: String,
    #[serde(default)]
    pub player_avatar: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanActionRequest {
    pub room_code: String,
    pub scan_action: ScanRecord,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDataRequest {
    pub room_code: String,
    pub player_data: ReportedPlayerData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMarketStateRequest {
    pub room_code: String,
    pub change_map: ChangeMap,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMessageRequest {
    pub room_code: String,
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default)]
    pub sender: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub room_code: String,
    #[serde(default)]
    pub player_name: String,
}

/// Every event a client may send, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    CreateRoom(CreateRoomRequest),
    CheckRoom(RoomRef),
    StartGame(RoomRef),
    UpdateSettings(UpdateSettingsRequest),
    ReorderPlayers(ReorderPlayersRequest),
    Join(JoinRequest),
    ScanAction(ScanActionRequest),
    UpdateData(UpdateDataRequest),
    SyncMarketState(SyncMarketStateRequest),
    RequestRefresh(RoomRef),
    TestMessage(TestMessageRequest),
    ScanDataRequest(RoomRef),
    Verify(VerifyRequest),
}

impl ClientEvent {
    /// Parse one raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for invalid JSON, unknown event names, or
    /// payloads that do not match the event's schema.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Event = serde_json::from_str(text)?;
        Self::from_event(envelope)
    }

    /// Decode an envelope by event name.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownEvent`] or [`ProtocolError::InvalidPayload`].
    pub fn from_event(envelope: Event) -> Result<Self, ProtocolError> {
        let Event { event, data } = envelope;
        match event.as_str() {
            HOST_CREATE_ROOM => decode(event, data).map(Self::CreateRoom),
            HOST_CHECK_ROOM => decode(event, data).map(Self::CheckRoom),
            HOST_START_GAME => decode(event, data).map(Self::StartGame),
            HOST_UPDATE_SETTINGS => decode(event, data).map(Self::UpdateSettings),
            HOST_REORDER_PLAYERS => decode(event, data).map(Self::ReorderPlayers),
            PLAYER_JOIN => decode(event, data).map(Self::Join),
            PLAYER_SCAN_ACTION => decode(event, data).map(Self::ScanAction),
            PLAYER_UPDATE_DATA => decode(event, data).map(Self::UpdateData),
            DASHBOARD_SYNC_MARKET_STATE => decode(event, data).map(Self::SyncMarketState),
            DASHBOARD_REQUEST_REFRESH => decode(event, data).map(Self::RequestRefresh),
            TEST_MESSAGE => decode(event, data).map(Self::TestMessage),
            SCAN_DATA_REQUEST => decode(event, data).map(Self::ScanDataRequest),
            ROOM_VERIFY => decode(event, data).map(Self::Verify),
            _ => Err(ProtocolError::UnknownEvent(event)),
        }
    }

    /// Wire name of the decoded event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom(_) => HOST_CREATE_ROOM,
            Self::CheckRoom(_) => HOST_CHECK_ROOM,
            Self::StartGame(_) => HOST_START_GAME,
            Self::UpdateSettings(_) => HOST_UPDATE_SETTINGS,
            Self::ReorderPlayers(_) => HOST_REORDER_PLAYERS,
            Self::Join(_) => PLAYER_JOIN,
            Self::ScanAction(_) => PLAYER_SCAN_ACTION,
            Self::UpdateData(_) => PLAYER_UPDATE_DATA,
            Self::SyncMarketState(_) => DASHBOARD_SYNC_MARKET_STATE,
            Self::RequestRefresh(_) => DASHBOARD_REQUEST_REFRESH,
            Self::TestMessage(_) => TEST_MESSAGE,
            Self::ScanDataRequest(_) => SCAN_DATA_REQUEST,
            Self::Verify(_) => ROOM_VERIFY,
        }
    }
}

fn decode<T: DeserializeOwned>(event: String, data: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload { event, source })
}

// =============================================================================
// OUTBOUND PAYLOADS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomReply<'a> {
    room_code: &'a str,
    room: &'a Room,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCheck {
    pub has_host: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_takeover: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForceRecalculation<'a> {
    prices: &'a PriceTable,
    timestamp: i64,
    triggered_by: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct MarketStateUpdate<'a> {
    #[serde(rename = "change24h")]
    change_24h: &'a ChangeMap,
}

/// Both scan logs of a room, newest entries first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanData {
    pub auto_scan_actions: ScanLog,
    pub player_scan_actions: ScanLog,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LivePlayerUpdate<'a> {
    player_id: ConnectionId,
    player_name: &'a str,
    total_value: f64,
    portfolio_value: f64,
    cash_balance: f64,
    timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinNotification<'a> {
    player_name: &'a str,
    player_avatar: &'a str,
    message: String,
    is_rejoining: bool,
    timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TestMessageReceived<'a> {
    message: &'a serde_json::Value,
    sender: &'a serde_json::Value,
    timestamp: i64,
    room_code: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub room_exists: bool,
    pub player_in_room: bool,
    pub socket_in_room: bool,
    pub players_count: usize,
    pub socket_ids: Vec<ConnectionId>,
    pub actual_sockets_in_room: Vec<ConnectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_data: Option<Room>,
}

// =============================================================================
// OUTBOUND CONSTRUCTORS
// =============================================================================

#[must_use]
pub fn session_connected(connection_id: ConnectionId) -> Event {
    Event::new(SESSION_CONNECTED, serde_json::json!({ "connectionId": connection_id }))
}

#[must_use]
pub fn gateway_error(message: &str) -> Event {
    Event::new(GATEWAY_ERROR, message)
}

#[must_use]
pub fn create_success(room: &Room) -> Event {
    Event::new(HOST_CREATE_SUCCESS, RoomReply { room_code: &room.code, room })
}

#[must_use]
pub fn join_success(room: &Room) -> Event {
    Event::new(PLAYER_JOIN_SUCCESS, RoomReply { room_code: &room.code, room })
}

#[must_use]
pub fn room_check_response(check: &RoomCheck) -> Event {
    Event::new(HOST_ROOM_CHECK_RESPONSE, check)
}

#[must_use]
pub fn lobby_update(room: &Room) -> Event {
    Event::new(LOBBY_UPDATE, room)
}

#[must_use]
pub fn game_started(room: &Room) -> Event {
    Event::new(GAME_STARTED, serde_json::json!({ "room": room }))
}

#[must_use]
pub fn price_update(prices: &PriceTable) -> Event {
    Event::new(CRYPTO_PRICE_UPDATE, prices)
}

#[must_use]
pub fn force_recalculation(prices: &PriceTable, triggered_by: &str) -> Event {
    Event::new(CRYPTO_FORCE_RECALCULATION, ForceRecalculation { prices, timestamp: now_ms(), triggered_by })
}

#[must_use]
pub fn market_state_update(change_24h: &ChangeMap) -> Event {
    Event::new(MARKET_STATE_UPDATE, MarketStateUpdate { change_24h })
}

#[must_use]
pub fn scan_data_update(auto_scan_actions: &ScanLog, player_scan_actions: &ScanLog) -> Event {
    Event::new(
        SCAN_DATA_UPDATE,
        serde_json::json!({
            "autoScanActions": auto_scan_actions,
            "playerScanActions": player_scan_actions,
        }),
    )
}

#[must_use]
pub fn live_player_update(player: &ReconciledPlayer) -> Event {
    Event::new(
        DASHBOARD_LIVE_PLAYER_UPDATE,
        LivePlayerUpdate {
            player_id: player.player_id,
            player_name: &player.player_name,
            total_value: player.total_value,
            portfolio_value: player.portfolio_value,
            cash_balance: player.cash_balance,
            timestamp: now_ms(),
        },
    )
}

#[must_use]
pub fn join_notification(player_name: &str, player_avatar: &str, is_rejoining: bool) -> Event {
    let message = if is_rejoining {
        format!("{player_name} rejoined the game")
    } else {
        format!("{player_name} joined the game")
    };
    Event::new(
        PLAYER_JOIN_NOTIFICATION,
        JoinNotification { player_name, player_avatar, message, is_rejoining, timestamp: now_ms() },
    )
}

#[must_use]
pub fn test_message_received(message: &serde_json::Value, sender: &serde_json::Value, room_code: &str) -> Event {
    Event::new(TEST_MESSAGE_RECEIVED, TestMessageReceived { message, sender, timestamp: now_ms(), room_code })
}

#[must_use]
pub fn verification_result(result: &VerificationResult) -> Event {
    Event::new(ROOM_VERIFICATION_RESULT, result)
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
