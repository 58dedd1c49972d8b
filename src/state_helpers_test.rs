use super::*;
use std::time::Duration;

use crate::services::{presence, registry};
use tokio::time::timeout;

/// Config with a ticker slow enough that it never fires during a test.
#[must_use]
pub fn test_config() -> Config {
    Config { market_tick_interval: Duration::from_secs(3600), ..Config::default() }
}

/// Create a test `AppState` with default timings and a dormant ticker.
#[must_use]
pub fn test_app_state() -> AppState {
    AppState::new(test_config())
}

/// Create a test `AppState` with custom config.
#[must_use]
pub fn test_app_state_with(config: Config) -> AppState {
    AppState::new(config)
}

/// A connected socket as seen by the services: id plus its fan-out receiver.
pub struct TestClient {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<Event>,
    pub rx: mpsc::Receiver<Event>,
}

impl TestClient {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self { id: Uuid::new_v4(), tx, rx }
    }
}

impl Default for TestClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a room hosted by a fresh client with a real (non-placeholder) host.
pub async fn create_room(state: &AppState, code: &str, host_name: &str) -> TestClient {
    let host = TestClient::new();
    let identity = registry::HostIdentity::new(host.id, host_name, "👑", Some(false));
    registry::create_or_takeover(state, code, identity, Settings::default(), host.tx.clone())
        .await
        .expect("room should be created");
    host
}

/// Join a fresh client to a room as a new player.
pub async fn join_player(state: &AppState, code: &str, name: &str, avatar: &str) -> TestClient {
    let player = TestClient::new();
    presence::join(state, code, name, avatar, player.id, player.tx.clone())
        .await
        .expect("player should join");
    player
}

/// Receive the next event or fail after 200ms.
pub async fn recv(rx: &mut mpsc::Receiver<Event>) -> Event {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("event receive timed out")
        .expect("event channel closed unexpectedly")
}

/// Receive events until one with `name` arrives, skipping others.
pub async fn recv_named(rx: &mut mpsc::Receiver<Event>, name: &str) -> Event {
    loop {
        let event = recv(rx).await;
        if event.event == name {
            return event;
        }
    }
}

/// Discard everything currently queued.
pub fn drain(rx: &mut mpsc::Receiver<Event>) {
    while rx.try_recv().is_ok() {}
}

/// Assert that nothing arrives within 80ms.
pub async fn assert_channel_empty(rx: &mut mpsc::Receiver<Event>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no event"
    );
}
