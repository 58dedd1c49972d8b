use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn empty_environment_uses_defaults() {
    let cfg = Config::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(cfg, Config::default());
    assert_eq!(cfg.bind_addr(), "0.0.0.0:3001");
    assert_eq!(cfg.player_grace_period, Duration::from_secs(900));
    assert_eq!(cfg.room_idle_timeout, Duration::from_secs(3600));
}

#[test]
fn overrides_are_parsed() {
    let cfg = Config::from_lookup(lookup_from(&[
        ("HOST", "127.0.0.1"),
        ("PORT", "8080"),
        ("APP_ENV", "production"),
        ("CORS_ORIGINS", "https://a.example, https://b.example,,"),
        ("PLAYER_GRACE_PERIOD_SECS", "30"),
        ("ROOM_IDLE_TIMEOUT_SECS", "120"),
        ("MARKET_TICK_INTERVAL_MS", "500"),
        ("MARKET_TICK_MAX_PERCENT", "2.5"),
    ]))
    .unwrap();

    assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
    assert_eq!(cfg.environment, Environment::Production);
    assert_eq!(cfg.cors_origins, vec!["https://a.example", "https://b.example"]);
    assert_eq!(cfg.player_grace_period, Duration::from_secs(30));
    assert_eq!(cfg.room_idle_timeout, Duration::from_secs(120));
    assert_eq!(cfg.market_tick_interval, Duration::from_millis(500));
    assert!((cfg.market_tick_max_percent - 2.5).abs() < f64::EPSILON);
}

#[test]
fn invalid_port_names_the_variable() {
    let err = Config::from_lookup(lookup_from(&[("PORT", "not-a-port")])).unwrap_err();
    assert_eq!(err, ConfigError::Invalid { var: "PORT", value: "not-a-port".into() });
}

#[test]
fn zero_tick_interval_is_rejected() {
    let err = Config::from_lookup(lookup_from(&[("MARKET_TICK_INTERVAL_MS", "0")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { var: "MARKET_TICK_INTERVAL_MS", .. }));
}

#[test]
fn negative_tick_percent_is_rejected() {
    let err = Config::from_lookup(lookup_from(&[("MARKET_TICK_MAX_PERCENT", "-1")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { var: "MARKET_TICK_MAX_PERCENT", .. }));
}

#[test]
fn unknown_environment_is_rejected() {
    let err = Config::from_lookup(lookup_from(&[("APP_ENV", "staging")])).unwrap_err();
    assert_eq!(err, ConfigError::UnknownEnvironment("staging".into()));
}
