//! Server configuration parsed from environment variables.
//!
//! One binary serves every deployment; the environment name only changes
//! logging of permissive CORS. All timings are overridable so tests and
//! staging can shorten grace periods and tick intervals.

use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_PLAYER_GRACE_PERIOD_SECS: u64 = 15 * 60;
pub const DEFAULT_ROOM_IDLE_TIMEOUT_SECS: u64 = 60 * 60;
pub const DEFAULT_MARKET_TICK_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_MARKET_TICK_MAX_PERCENT: f64 = 5.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("unknown APP_ENV: {0} (expected 'development' or 'production')")]
    UnknownEnvironment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
    /// How long a disconnected player's record survives without a rejoin.
    pub player_grace_period: Duration,
    /// How long a room without participants survives.
    pub room_idle_timeout: Duration,
    pub market_tick_interval: Duration,
    /// Upper bound of the random tick delta, in percent, before volatility scaling.
    pub market_tick_max_percent: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            environment: Environment::Development,
            cors_origins: Vec::new(),
            player_grace_period: Duration::from_secs(DEFAULT_PLAYER_GRACE_PERIOD_SECS),
            room_idle_timeout: Duration::from_secs(DEFAULT_ROOM_IDLE_TIMEOUT_SECS),
            market_tick_interval: Duration::from_millis(DEFAULT_MARKET_TICK_INTERVAL_MS),
            market_tick_max_percent: DEFAULT_MARKET_TICK_MAX_PERCENT,
        }
    }
}

impl Config {
    /// Build typed config from process environment variables.
    ///
    /// Optional:
    /// - `HOST`, `PORT`: bind address (default `0.0.0.0:3001`)
    /// - `APP_ENV`: `development` (default) or `production`
    /// - `CORS_ORIGINS`: comma-separated origin list
    /// - `PLAYER_GRACE_PERIOD_SECS`: default 900
    /// - `ROOM_IDLE_TIMEOUT_SECS`: default 3600
    /// - `MARKET_TICK_INTERVAL_MS`: default 15000
    /// - `MARKET_TICK_MAX_PERCENT`: default 5.0
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is present but unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = parse_environment(lookup("APP_ENV").as_deref())?;
        let cors_origins = lookup("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let tick_max_percent: f64 = parse_var(&lookup, "MARKET_TICK_MAX_PERCENT", DEFAULT_MARKET_TICK_MAX_PERCENT)?;
        if !tick_max_percent.is_finite() || tick_max_percent < 0.0 {
            return Err(ConfigError::Invalid { var: "MARKET_TICK_MAX_PERCENT", value: tick_max_percent.to_string() });
        }

        let tick_interval_ms: u64 = parse_var(&lookup, "MARKET_TICK_INTERVAL_MS", DEFAULT_MARKET_TICK_INTERVAL_MS)?;
        if tick_interval_ms == 0 {
            return Err(ConfigError::Invalid { var: "MARKET_TICK_INTERVAL_MS", value: "0".into() });
        }

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_var(&lookup, "PORT", DEFAULT_PORT)?,
            environment,
            cors_origins,
            player_grace_period: Duration::from_secs(parse_var(
                &lookup,
                "PLAYER_GRACE_PERIOD_SECS",
                DEFAULT_PLAYER_GRACE_PERIOD_SECS,
            )?),
            room_idle_timeout: Duration::from_secs(parse_var(
                &lookup,
                "ROOM_IDLE_TIMEOUT_SECS",
                DEFAULT_ROOM_IDLE_TIMEOUT_SECS,
            )?),
            market_tick_interval: Duration::from_millis(tick_interval_ms),
            market_tick_max_percent: tick_max_percent,
        })
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn parse_environment(raw: Option<&str>) -> Result<Environment, ConfigError> {
    match raw.map(str::trim).unwrap_or("development") {
        "development" | "dev" => Ok(Environment::Development),
        "production" | "prod" => Ok(Environment::Production),
        other => Err(ConfigError::UnknownEnvironment(other.to_string())),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
