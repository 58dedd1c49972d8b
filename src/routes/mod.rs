//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The relay exposes one WebSocket endpoint for every realtime event and a
//! JSON health probe. CORS is driven by config: an empty origin list
//! allows any origin, otherwise only the listed ones.

pub mod health;
pub mod ws;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::{Config, Environment};
use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/health", get(health::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.is_empty() {
        if config.environment == Environment::Production {
            warn!("CORS_ORIGINS is empty in production; allowing any origin");
        }
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
