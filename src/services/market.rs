//! Market service — authoritative prices, change ledger, and scan effects.
//!
//! DESIGN
//! ======
//! One process-wide `PriceTable` is the only source used for valuation.
//! Each room additionally keeps a cumulative percentage ledger
//! (`change_24h`) that is advanced by the same deltas that move prices, and
//! can be overwritten per symbol by the dashboard's baseline push.
//!
//! Price updates are multiplicative: `price * (1 + pct / 100)`, rounded to
//! cents and floored at [`PRICE_FLOOR`].
//!
//! ERROR HANDLING
//! ==============
//! Nothing here fails terminally. A missing room or an unknown symbol is
//! logged and treated as a no-op, since clients fire these events without
//! waiting for a reply.

use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::now_ms;
use crate::protocol::{self, ScanData};
use crate::state::{AppState, ChangeMap, ConnectionId, PriceTable, RoomState, ScanRecord};

/// Tradable symbols and their prices at process start.
pub const INITIAL_PRICES: [(&str, f64); 8] = [
    ("BTC", 45_000.0),
    ("ETH", 3_000.0),
    ("SOL", 100.0),
    ("ADA", 0.5),
    ("DOT", 7.0),
    ("LINK", 15.0),
    ("DOGE", 0.08),
    ("AVAX", 35.0),
];

/// Lowest price any symbol may reach.
pub const PRICE_FLOOR: f64 = 0.01;

const BOT_NAMES: [&str; 5] = ["Market Maker", "Whale Alert", "Trading Bot", "Arbitrage Bot", "Momentum Bot"];

// =============================================================================
// PRICE MATH
// =============================================================================

/// Round a monetary amount to cents.
#[must_use]
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Apply a percentage change to a price, rounding to cents and flooring.
#[must_use]
pub fn apply_percent(price: f64, percentage: f64) -> f64 {
    let next = round_cents(price * (1.0 + percentage / 100.0));
    if next.is_finite() { next.max(PRICE_FLOOR) } else { price }
}

/// Pick a symbol and a delta for one periodic tick.
pub fn draw_tick<R: Rng>(rng: &mut R, symbols: &[String], max_percent: f64) -> Option<(String, f64)> {
    let symbol = symbols.choose(rng)?.clone();
    let delta = if max_percent > 0.0 { rng.random_range(-max_percent..=max_percent) } else { 0.0 };
    Some((symbol, round_cents(delta)))
}

/// Move one symbol's price and the room ledger by `percentage`.
///
/// Returns the new price, or `None` if the symbol is not tradable.
fn move_market(prices: &mut PriceTable, ledger: &mut ChangeMap, symbol: &str, percentage: f64) -> Option<f64> {
    let current = prices.get(symbol)?;
    let next = apply_percent(current, percentage);
    prices.set(symbol, next);
    let cumulative = ledger.entry(symbol.to_string()).or_insert(0.0);
    *cumulative = round_cents(*cumulative + percentage);
    Some(next)
}

/// A ledger with every tradable symbol at zero.
#[must_use]
pub fn fresh_ledger(prices: &PriceTable) -> ChangeMap {
    prices.symbols().map(|s| (s.to_string(), 0.0)).collect()
}

fn fill_record_defaults(record: &mut ScanRecord) {
    if record.id.is_empty() {
        record.id = Uuid::new_v4().to_string();
    }
    if record.timestamp == 0 {
        record.timestamp = now_ms();
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Prices plus one room's ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub prices: PriceTable,
    pub change_24h: ChangeMap,
}

/// Current prices and the room's change ledger.
pub async fn snapshot(state: &AppState, room_code: &str) -> Option<MarketSnapshot> {
    let rooms = state.rooms.read().await;
    let room_state = rooms.get(room_code)?;
    let prices = state.prices.read().await;
    Some(MarketSnapshot { prices: prices.clone(), change_24h: room_state.change_24h.clone() })
}

/// Both scan logs of a room.
pub async fn scan_data(state: &AppState, room_code: &str) -> Option<ScanData> {
    let rooms = state.rooms.read().await;
    rooms.get(room_code).map(scan_data_of)
}

pub(crate) fn scan_data_of(room_state: &RoomState) -> ScanData {
    ScanData {
        auto_scan_actions: room_state.auto_scan_actions.clone(),
        player_scan_actions: room_state.player_scan_actions.clone(),
    }
}

// =============================================================================
// PERIODIC TICK
// =============================================================================

/// Apply one synthetic market move to a started room.
///
/// Returns `false` when the room is gone or not started, which stops the
/// ticker.
pub async fn apply_periodic_tick(state: &AppState, room_code: &str) -> bool {
    let mut rooms = state.rooms.write().await;
    let Some(room_state) = rooms.get_mut(room_code) else {
        debug!(%room_code, "market tick: room gone");
        return false;
    };
    if !room_state.room.started {
        return false;
    }

    let mut prices = state.prices.write().await;
    let symbols: Vec<String> = prices.symbols().map(str::to_string).collect();
    let max_percent = state.config.market_tick_max_percent * room_state.room.settings.volatility.factor();
    let drawn = {
        let mut rng = rand::rng();
        let bot = BOT_NAMES.choose(&mut rng).copied().unwrap_or("Trading Bot");
        draw_tick(&mut rng, &symbols, max_percent).map(|(symbol, delta)| (bot, symbol, delta))
    };
    let Some((bot, symbol, delta)) = drawn else {
        warn!(%room_code, "market tick: no tradable symbols");
        return true;
    };

    let Some(price) = move_market(&mut prices, &mut room_state.change_24h, &symbol, delta) else {
        return true;
    };

    let action = if delta >= 0.0 { "BUY" } else { "SELL" };
    room_state.auto_scan_actions.push(ScanRecord {
        id: Uuid::new_v4().to_string(),
        timestamp: now_ms(),
        player: bot.to_string(),
        action: action.to_string(),
        effect: format!("{symbol} {delta:+.2}%"),
        crypto_symbol: Some(symbol.clone()),
        percentage_value: Some(delta),
    });

    debug!(%room_code, %symbol, delta, price, "market tick");
    room_state.fan_out(&[
        protocol::price_update(&prices),
        protocol::scan_data_update(&room_state.auto_scan_actions, &room_state.player_scan_actions),
        protocol::market_state_update(&room_state.change_24h),
    ]);
    true
}

/// Spawn the periodic ticker for a room. The first tick fires one interval
/// after start; the task ends once the room is gone.
pub fn spawn_ticker(state: AppState, room_code: String) -> JoinHandle<()> {
    let period: Duration = state.config.market_tick_interval;
    info!(%room_code, ?period, "market ticker started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if !apply_periodic_tick(&state, &room_code).await {
                break;
            }
        }
        info!(%room_code, "market ticker stopped");
    })
}

// =============================================================================
// SCAN EFFECT
// =============================================================================

/// Record a player scan and apply its market effect, if it carries one.
///
/// Returns `true` when the action was recorded.
pub async fn apply_scan_effect(state: &AppState, room_code: &str, mut record: ScanRecord) -> bool {
    let mut rooms = state.rooms.write().await;
    let Some(room_state) = rooms.get_mut(room_code) else {
        warn!(%room_code, "scan action for unknown room");
        return false;
    };
    fill_record_defaults(&mut record);

    let effect = match (record.crypto_symbol.clone(), record.percentage_value) {
        (Some(symbol), Some(percentage)) => Some((symbol, percentage)),
        _ => None,
    };

    let Some((symbol, percentage)) = effect else {
        info!(%room_code, player = %record.player, action = %record.action, "scan action without market effect");
        room_state.player_scan_actions.push(record);
        room_state.fan_out(&[protocol::scan_data_update(
            &room_state.auto_scan_actions,
            &room_state.player_scan_actions,
        )]);
        return true;
    };

    let mut prices = state.prices.write().await;
    if prices.get(&symbol).is_none() {
        warn!(%room_code, %symbol, "scan action for unknown symbol ignored");
        return false;
    }

    let triggered_by = record.player.clone();
    let price = move_market(&mut prices, &mut room_state.change_24h, &symbol, percentage);
    info!(%room_code, player = %record.player, %symbol, percentage, ?price, "scan action applied");
    room_state.player_scan_actions.push(record);

    room_state.fan_out(&[
        protocol::price_update(&prices),
        protocol::scan_data_update(&room_state.auto_scan_actions, &room_state.player_scan_actions),
        protocol::market_state_update(&room_state.change_24h),
        protocol::force_recalculation(&prices, &triggered_by),
    ]);
    true
}

// =============================================================================
// DASHBOARD BASELINE
// =============================================================================

/// Merge the dashboard's change map into the room ledger (last write wins
/// per symbol) and rebroadcast it. Only the room's host may push a baseline.
pub async fn merge_dashboard_baseline(
    state: &AppState,
    room_code: &str,
    connection_id: ConnectionId,
    change_map: ChangeMap,
) -> bool {
    let mut rooms = state.rooms.write().await;
    let Some(room_state) = rooms.get_mut(room_code) else {
        warn!(%room_code, "market baseline for unknown room");
        return false;
    };
    if room_state.room.host_id != connection_id {
        warn!(%room_code, %connection_id, "market baseline from non-host ignored");
        return false;
    }

    let mut merged = 0usize;
    for (symbol, change) in change_map {
        if !change.is_finite() {
            continue;
        }
        room_state.change_24h.insert(symbol, change);
        merged += 1;
    }
    info!(%room_code, merged, "market baseline merged");

    room_state.fan_out(&[protocol::market_state_update(&room_state.change_24h)]);
    true
}

#[cfg(test)]
#[path = "market_test.rs"]
mod tests;
