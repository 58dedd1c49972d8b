use super::*;
use crate::protocol::{CRYPTO_FORCE_RECALCULATION, DASHBOARD_LIVE_PLAYER_UPDATE};
use crate::services::registry;
use crate::state::test_helpers::{self, assert_channel_empty, create_room, join_player, recv};
use uuid::Uuid;

fn report(portfolio: &[(&str, f64)], cash: f64, portfolio_value: f64, total_value: f64) -> ReportedPlayerData {
    ReportedPlayerData {
        portfolio: portfolio.iter().map(|(s, a)| ((*s).to_string(), *a)).collect(),
        cash_balance: cash,
        portfolio_value,
        total_value,
    }
}

// =============================================================================
// PURE
// =============================================================================

#[test]
fn portfolio_value_ignores_unpriced_symbols() {
    let prices = PriceTable::from_pairs(&[("BTC", 100.0), ("ETH", 10.0)]);
    let holdings = report(&[("BTC", 2.0), ("ETH", 0.5), ("XYZ", 1_000.0)], 0.0, 0.0, 0.0).portfolio;
    assert!((portfolio_value(&prices, &holdings) - 205.0).abs() < 1e-9);
}

#[test]
fn sanitize_clamps_negative_holdings() {
    let holdings = sanitize_portfolio(report(&[("BTC", -3.0), ("ETH", 1.5), ("SOL", f64::NAN)], 0.0, 0.0, 0.0).portfolio);
    assert_eq!(holdings.get("BTC"), Some(&0.0));
    assert_eq!(holdings.get("ETH"), Some(&1.5));
    assert!(!holdings.contains_key("SOL"));
}

#[test]
fn validate_rejects_negative_and_non_finite() {
    assert!(report(&[], 10.0, 0.0, 10.0).validate().is_ok());
    assert_eq!(
        report(&[], -1.0, 0.0, 0.0).validate(),
        Err(ReconcileError::InvalidField("cashBalance"))
    );
    assert_eq!(
        report(&[], 1.0, f64::INFINITY, 0.0).validate(),
        Err(ReconcileError::InvalidField("portfolioValue"))
    );
    assert_eq!(
        report(&[], 1.0, 0.0, f64::NAN).validate(),
        Err(ReconcileError::InvalidField("totalValue"))
    );
}

// =============================================================================
// RECONCILE
// =============================================================================

#[tokio::test]
async fn server_figures_override_client_drift() {
    let state = test_helpers::test_app_state();
    *state.prices.write().await = PriceTable::from_pairs(&[("BTC", 100.0)]);
    let _host = create_room(&state, "RC", "Dana").await;
    let alice = join_player(&state, "RC", "Alice", "🐱").await;

    let result = reconcile(&state, "RC", alice.id, report(&[("BTC", 2.0)], 50.0, 999.0, 1_099.0))
        .await
        .unwrap();

    assert!(result.corrected);
    assert!((result.portfolio_value - 200.0).abs() < 1e-9);
    assert!((result.total_value - 250.0).abs() < 1e-9);

    let stored = registry::get(&state, "RC").await.unwrap().players[&alice.id].clone();
    assert!((stored.portfolio_value - 200.0).abs() < 1e-9);
    assert!((stored.total_value - 250.0).abs() < 1e-9);
    assert!((stored.cash_balance - 50.0).abs() < 1e-9);
    assert_eq!(stored.portfolio.get("BTC"), Some(&2.0));
}

#[tokio::test]
async fn accurate_report_is_not_a_correction() {
    let state = test_helpers::test_app_state();
    *state.prices.write().await = PriceTable::from_pairs(&[("BTC", 100.0)]);
    let _host = create_room(&state, "RC", "Dana").await;
    let alice = join_player(&state, "RC", "Alice", "🐱").await;

    let result = reconcile(&state, "RC", alice.id, report(&[("BTC", 1.0)], 5.0, 100.004, 105.0))
        .await
        .unwrap();
    assert!(!result.corrected);
}

#[tokio::test]
async fn broadcasts_live_update_then_recalculation() {
    let state = test_helpers::test_app_state();
    let mut host = create_room(&state, "RC", "Dana").await;
    let alice = join_player(&state, "RC", "Alice", "🐱").await;
    test_helpers::drain(&mut host.rx);

    reconcile(&state, "RC", alice.id, report(&[], 100.0, 0.0, 100.0)).await.unwrap();

    let live = recv(&mut host.rx).await;
    assert_eq!(live.event, DASHBOARD_LIVE_PLAYER_UPDATE);
    assert_eq!(live.data["playerName"], "Alice");
    assert_eq!(live.data["totalValue"], serde_json::json!(100.0));
    let recalc = recv(&mut host.rx).await;
    assert_eq!(recalc.event, CRYPTO_FORCE_RECALCULATION);
    assert_eq!(recalc.data["triggeredBy"], "Alice");
}

#[tokio::test]
async fn invalid_report_is_dropped_without_broadcast() {
    let state = test_helpers::test_app_state();
    let mut host = create_room(&state, "RC", "Dana").await;
    let alice = join_player(&state, "RC", "Alice", "🐱").await;
    test_helpers::drain(&mut host.rx);
    let before = registry::get(&state, "RC").await.unwrap();

    let err = reconcile(&state, "RC", alice.id, report(&[], -5.0, 0.0, 0.0)).await.unwrap_err();
    assert_eq!(err.error_code(), "E_INVALID_PLAYER_DATA");

    assert_eq!(registry::get(&state, "RC").await.unwrap(), before);
    assert_channel_empty(&mut host.rx).await;
}

#[test]
fn report_missing_a_figure_does_not_decode() {
    let partial = serde_json::json!({"portfolio": {"BTC": 1.0}, "cashBalance": 5.0});
    assert!(serde_json::from_value::<ReportedPlayerData>(partial).is_err());

    let complete = serde_json::json!({"cashBalance": 5.0, "portfolioValue": 0.0, "totalValue": 5.0});
    let decoded: ReportedPlayerData = serde_json::from_value(complete).unwrap();
    assert!(decoded.portfolio.is_empty());
}

#[tokio::test]
async fn overflowing_holdings_are_dropped() {
    let state = test_helpers::test_app_state();
    let mut host = create_room(&state, "RC", "Dana").await;
    let alice = join_player(&state, "RC", "Alice", "🐱").await;
    test_helpers::drain(&mut host.rx);
    let before = registry::get(&state, "RC").await.unwrap();

    let err = reconcile(&state, "RC", alice.id, report(&[("BTC", 1e308)], 5.0, 0.0, 5.0)).await.unwrap_err();
    assert_eq!(err, ReconcileError::InvalidField("portfolio"));

    assert_eq!(registry::get(&state, "RC").await.unwrap(), before);
    assert_channel_empty(&mut host.rx).await;
}

#[tokio::test]
async fn unknown_room_or_player_is_rejected() {
    let state = test_helpers::test_app_state();
    let host = create_room(&state, "RC", "Dana").await;
    let stranger = Uuid::new_v4();

    let err = reconcile(&state, "NOPE", stranger, report(&[], 1.0, 0.0, 1.0)).await.unwrap_err();
    assert_eq!(err, ReconcileError::RoomNotFound("NOPE".into()));

    let err = reconcile(&state, "RC", stranger, report(&[], 1.0, 0.0, 1.0)).await.unwrap_err();
    assert_eq!(err, ReconcileError::PlayerNotFound(stranger));

    let err = reconcile(&state, "RC", host.id, report(&[], 1.0, 0.0, 1.0)).await.unwrap_err();
    assert_eq!(err, ReconcileError::PlayerNotFound(host.id));
}
