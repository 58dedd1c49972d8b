use super::*;
use std::time::Duration;

use crate::config::Config;
use crate::protocol::{LOBBY_UPDATE, PLAYER_JOIN_NOTIFICATION};
use crate::state::test_helpers::{self, TestClient, assert_channel_empty, create_room, join_player, recv, recv_named};

fn short_grace() -> Config {
    Config { player_grace_period: Duration::from_millis(40), ..test_helpers::test_config() }
}

async fn player_named(state: &AppState, code: &str, name: &str) -> Option<Player> {
    let room = registry::get(state, code).await?;
    room.players.into_values().find(|p| p.name == name)
}

// =============================================================================
// JOIN
// =============================================================================

#[tokio::test]
async fn join_creates_player_with_starting_cash_and_starter_portfolio() {
    let state = test_helpers::test_app_state();
    let mut host = create_room(&state, "J", "Dana").await;
    let alice = TestClient::new();

    let outcome = join(&state, "J", "Alice", "🐱", alice.id, alice.tx.clone()).await.unwrap();

    assert!(!outcome.is_rejoining);
    assert_eq!(outcome.player.id, alice.id);
    assert!((outcome.player.cash_balance - 10_000.0).abs() < 1e-9);
    assert_eq!(outcome.player.portfolio, starter_portfolio());
    // 0.01 BTC @ 45000 + 0.1 ETH @ 3000 + 1 SOL @ 100
    assert!((outcome.player.portfolio_value - 850.0).abs() < 1e-9);
    assert!((outcome.player.total_value - 10_850.0).abs() < 1e-9);
    assert_eq!(outcome.room.player_order, vec![alice.id]);

    let replies: Vec<String> = outcome.replies().into_iter().map(|e| e.event).collect();
    assert_eq!(
        replies,
        vec!["player:joinSuccess", "crypto:priceUpdate", "market:stateUpdate", "scanData:update"]
    );

    assert_eq!(recv(&mut host.rx).await.event, LOBBY_UPDATE);
    let notification = recv(&mut host.rx).await;
    assert_eq!(notification.event, PLAYER_JOIN_NOTIFICATION);
    assert_eq!(notification.data["playerName"], "Alice");
    assert_eq!(notification.data["isRejoining"], false);
}

#[tokio::test]
async fn join_errors_leave_room_untouched() {
    let state = test_helpers::test_app_state();
    let host = create_room(&state, "J", "Dana").await;
    let _alice = join_player(&state, "J", "Alice", "🐱").await;
    let before = registry::get(&state, "J").await.unwrap();

    let intruder = TestClient::new();
    let err = join(&state, "J", "Alice", "🐱", intruder.id, intruder.tx.clone()).await.unwrap_err();
    assert_eq!(err, JoinError::NameInUse("Alice".into()));

    let err = join(&state, "NOPE", "Zed", "", intruder.id, intruder.tx.clone()).await.unwrap_err();
    assert_eq!(err, JoinError::RoomNotFound("NOPE".into()));

    let err = join(&state, "J", "   ", "", intruder.id, intruder.tx.clone()).await.unwrap_err();
    assert_eq!(err, JoinError::MissingName);

    let err = join(&state, "J", "Dana", "", host.id, host.tx.clone()).await.unwrap_err();
    assert_eq!(err, JoinError::HostCannotJoin);

    assert_eq!(registry::get(&state, "J").await.unwrap(), before);
    assert!(!state.rooms.read().await["J"].clients.contains_key(&intruder.id));
}

#[tokio::test]
async fn same_name_with_different_avatar_is_a_new_player() {
    let state = test_helpers::test_app_state();
    let _host = create_room(&state, "J", "Dana").await;
    let _a = join_player(&state, "J", "Alice", "🐱").await;
    let _b = join_player(&state, "J", "Alice", "🐶").await;

    assert_eq!(registry::get(&state, "J").await.unwrap().participant_count(), 2);
}

#[tokio::test]
async fn repeated_join_from_same_connection_is_idempotent() {
    let state = test_helpers::test_app_state();
    let _host = create_room(&state, "J", "Dana").await;
    let mut alice = join_player(&state, "J", "Alice", "🐱").await;
    test_helpers::drain(&mut alice.rx);

    let outcome = join(&state, "J", "Alice", "🐱", alice.id, alice.tx.clone()).await.unwrap();

    assert_eq!(outcome.player.id, alice.id);
    assert_eq!(outcome.room.participant_count(), 1);
    assert_channel_empty(&mut alice.rx).await;
}

#[tokio::test]
async fn join_after_start_is_refused_for_new_names() {
    let state = test_helpers::test_app_state();
    let host = create_room(&state, "J", "Dana").await;
    registry::start_game(&state, "J", host.id).await.unwrap();

    let late = TestClient::new();
    let err = join(&state, "J", "Late", "", late.id, late.tx.clone()).await.unwrap_err();
    assert_eq!(err, JoinError::GameStarted);
    assert!(registry::get(&state, "J").await.unwrap().started);
}

// =============================================================================
// REJOIN
// =============================================================================

#[tokio::test]
async fn rejoin_restores_holdings_and_order_slot() {
    let state = test_helpers::test_app_state();
    let mut host = create_room(&state, "RJ", "Dana").await;
    let alice = join_player(&state, "RJ", "Alice", "🐱").await;
    let bob = join_player(&state, "RJ", "Bob", "🐶").await;

    {
        let mut rooms = state.rooms.write().await;
        let player = rooms.get_mut("RJ").unwrap().room.players.get_mut(&alice.id).unwrap();
        player.portfolio = [("BTC".to_string(), 0.5)].into_iter().collect();
        player.cash_balance = 1_234.0;
    }
    registry::start_game(&state, "RJ", host.id).await.unwrap();

    handle_disconnect(&state, alice.id).await;
    let ghost = player_named(&state, "RJ", "Alice").await.unwrap();
    assert!(ghost.disconnected);
    assert!(ghost.disconnected_at.is_some());
    assert!(state.grace_timers.is_pending(&("RJ".to_string(), alice.id)));
    test_helpers::drain(&mut host.rx);

    let returning = TestClient::new();
    let outcome = join(&state, "RJ", "Alice", "🐱", returning.id, returning.tx.clone()).await.unwrap();

    assert!(outcome.is_rejoining);
    assert!(outcome.player.is_rejoining);
    assert!(!outcome.player.disconnected);
    assert_eq!(outcome.player.disconnected_at, None);
    assert_eq!(outcome.player.id, returning.id);
    assert_eq!(outcome.player.portfolio.get("BTC"), Some(&0.5));
    assert!((outcome.player.cash_balance - 1_234.0).abs() < 1e-9);
    assert_eq!(outcome.room.player_order, vec![returning.id, bob.id]);
    assert!(!outcome.room.players.contains_key(&alice.id));
    assert!(!state.grace_timers.is_pending(&("RJ".to_string(), alice.id)));

    let notification = recv_named(&mut host.rx, PLAYER_JOIN_NOTIFICATION).await;
    assert_eq!(notification.data["isRejoining"], true);
    assert_eq!(notification.data["message"], "Alice rejoined the game");
}

// =============================================================================
// DISCONNECT
// =============================================================================

#[tokio::test]
async fn player_disconnect_marks_record_and_notifies_room() {
    let state = test_helpers::test_app_state();
    let mut host = create_room(&state, "DC", "Dana").await;
    let alice = join_player(&state, "DC", "Alice", "🐱").await;
    test_helpers::drain(&mut host.rx);

    handle_disconnect(&state, alice.id).await;

    let lobby = recv(&mut host.rx).await;
    assert_eq!(lobby.event, LOBBY_UPDATE);
    let record = &lobby.data["players"][alice.id.to_string()];
    assert_eq!(record["disconnected"], true);
    assert!(!state.rooms.read().await["DC"].clients.contains_key(&alice.id));
}

#[tokio::test]
async fn host_disconnect_deletes_room() {
    let state = test_helpers::test_app_state();
    let host = create_room(&state, "DC", "Dana").await;
    let _alice = join_player(&state, "DC", "Alice", "🐱").await;
    registry::start_game(&state, "DC", host.id).await.unwrap();

    handle_disconnect(&state, host.id).await;

    assert!(registry::get(&state, "DC").await.is_none());
    assert!(!state.idle_timers.is_pending(&"DC".to_string()));
}

#[tokio::test]
async fn grace_expiry_removes_player_and_arms_idle_cleanup() {
    let state = test_helpers::test_app_state_with(short_grace());
    let mut host = create_room(&state, "GR", "Dana").await;
    let alice = join_player(&state, "GR", "Alice", "🐱").await;
    assert!(!state.idle_timers.is_pending(&"GR".to_string()));

    handle_disconnect(&state, alice.id).await;
    test_helpers::drain(&mut host.rx);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let room = registry::get(&state, "GR").await.unwrap();
    assert!(!room.players.contains_key(&alice.id));
    assert!(room.player_order.is_empty());
    assert!(state.idle_timers.is_pending(&"GR".to_string()));
    assert_eq!(recv(&mut host.rx).await.event, LOBBY_UPDATE);
}

#[tokio::test]
async fn rejoin_within_grace_survives_expiry() {
    let state = test_helpers::test_app_state_with(short_grace());
    let _host = create_room(&state, "GR", "Dana").await;
    let alice = join_player(&state, "GR", "Alice", "🐱").await;

    handle_disconnect(&state, alice.id).await;
    let returning = join_player(&state, "GR", "Alice", "🐱").await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let room = registry::get(&state, "GR").await.unwrap();
    assert!(room.players.contains_key(&returning.id));
    assert_eq!(room.participant_count(), 1);
}

#[tokio::test]
async fn leaving_one_room_does_not_touch_another() {
    let state = test_helpers::test_app_state();
    let _a = create_room(&state, "A", "Dana").await;
    let _b = create_room(&state, "B", "Eve").await;
    let alice = join_player(&state, "A", "Alice", "🐱").await;

    leave_room(&state, "B", alice.id).await;

    let player = player_named(&state, "A", "Alice").await.unwrap();
    assert!(!player.disconnected);
}
