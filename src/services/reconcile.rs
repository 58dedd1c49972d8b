//! Player data reconciliation.
//!
//! DESIGN
//! ======
//! Clients report their own portfolio and figures, but only the holdings
//! and cash are trusted. Portfolio value and total are recomputed from the
//! authoritative price table; when the client's numbers drift by more than
//! [`EPSILON`] the server figures win and the correction is logged. The
//! stored record always carries the server figures.
//!
//! ERROR HANDLING
//! ==============
//! Invalid reports are returned as [`ReconcileError`] and dropped by the
//! caller with a warning. Clients are not notified. A report missing any of
//! the three figures never decodes, so it is dropped at the transport. So
//! are holdings whose value overflows to infinity at current prices.

use serde::Deserialize;
use tracing::{info, warn};

use crate::event::ErrorCode;
use crate::protocol;
use crate::services::market::round_cents;
use crate::state::{AppState, ConnectionId, Portfolio, PriceTable};

/// Largest drift tolerated between reported and computed figures.
pub const EPSILON: f64 = 0.01;

/// Figures a client reports in `player:updateData`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedPlayerData {
    #[serde(default)]
    pub portfolio: Portfolio,
    pub cash_balance: f64,
    pub portfolio_value: f64,
    pub total_value: f64,
}

/// Server-side figures after reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledPlayer {
    pub player_id: ConnectionId,
    pub player_name: String,
    pub portfolio_value: f64,
    pub total_value: f64,
    pub cash_balance: f64,
    /// Whether the client's figures were overridden.
    pub corrected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("Room {0} not found")]
    RoomNotFound(String),
    #[error("Connection {0} has no player in the room")]
    PlayerNotFound(ConnectionId),
    #[error("{0} must be a non-negative number")]
    InvalidField(&'static str),
}

impl ErrorCode for ReconcileError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "E_ROOM_NOT_FOUND",
            Self::PlayerNotFound(_) => "E_PLAYER_NOT_FOUND",
            Self::InvalidField(_) => "E_INVALID_PLAYER_DATA",
        }
    }
}

impl ReportedPlayerData {
    /// Reject negative or non-finite figures.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::InvalidField`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let fields = [
            ("cashBalance", self.cash_balance),
            ("portfolioValue", self.portfolio_value),
            ("totalValue", self.total_value),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ReconcileError::InvalidField(name));
            }
        }
        Ok(())
    }
}

/// Clamp holdings to non-negative amounts, dropping non-finite ones.
#[must_use]
pub fn sanitize_portfolio(portfolio: Portfolio) -> Portfolio {
    portfolio
        .into_iter()
        .filter(|(_, amount)| amount.is_finite())
        .map(|(symbol, amount)| (symbol, amount.max(0.0)))
        .collect()
}

/// Value holdings at current prices. Symbols without a price count as zero.
#[must_use]
pub fn portfolio_value(prices: &PriceTable, portfolio: &Portfolio) -> f64 {
    let sum: f64 = portfolio
        .iter()
        .map(|(symbol, amount)| amount * prices.get(symbol).unwrap_or(0.0))
        .sum();
    round_cents(sum)
}

fn drifted(reported: f64, computed: f64) -> bool {
    (reported - computed).abs() > EPSILON
}

/// Recompute, store, and broadcast one player's figures.
///
/// # Errors
///
/// Returns [`ReconcileError`] if the report is invalid or the connection
/// has no player record in the room. Nothing is mutated in that case.
pub async fn reconcile(
    state: &AppState,
    room_code: &str,
    connection_id: ConnectionId,
    reported: ReportedPlayerData,
) -> Result<ReconciledPlayer, ReconcileError> {
    reported.validate()?;

    let mut rooms = state.rooms.write().await;
    let room_state = rooms
        .get_mut(room_code)
        .ok_or_else(|| ReconcileError::RoomNotFound(room_code.to_string()))?;
    let player = room_state
        .room
        .players
        .get_mut(&connection_id)
        .filter(|p| !p.is_host)
        .ok_or(ReconcileError::PlayerNotFound(connection_id))?;

    let prices = state.prices.read().await;
    let portfolio = sanitize_portfolio(reported.portfolio);
    let computed_portfolio = portfolio_value(&prices, &portfolio);
    let computed_total = round_cents(computed_portfolio + reported.cash_balance);
    if !computed_total.is_finite() {
        return Err(ReconcileError::InvalidField("portfolio"));
    }

    let corrected =
        drifted(reported.portfolio_value, computed_portfolio) || drifted(reported.total_value, computed_total);
    if corrected {
        warn!(
            %room_code,
            player = %player.name,
            reported_portfolio = reported.portfolio_value,
            reported_total = reported.total_value,
            computed_portfolio,
            computed_total,
            "player figures corrected"
        );
    }

    player.portfolio = portfolio;
    player.cash_balance = reported.cash_balance;
    player.portfolio_value = computed_portfolio;
    player.total_value = computed_total;

    let result = ReconciledPlayer {
        player_id: connection_id,
        player_name: player.name.clone(),
        portfolio_value: computed_portfolio,
        total_value: computed_total,
        cash_balance: reported.cash_balance,
        corrected,
    };
    info!(%room_code, player = %result.player_name, total = computed_total, "player data updated");

    room_state.fan_out(&[
        protocol::live_player_update(&result),
        protocol::force_recalculation(&prices, &result.player_name),
    ]);
    Ok(result)
}

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
