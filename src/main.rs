mod config;
mod event;
mod protocol;
mod routes;
mod services;
mod state;
mod timers;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is normal outside local development.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env().inspect_err(|e| tracing::error!(error = %e, "invalid configuration"))?;
    let bind_addr = config.bind_addr();
    tracing::info!(
        environment = ?config.environment,
        cors_origins = ?config.cors_origins,
        grace = ?config.player_grace_period,
        idle = ?config.room_idle_timeout,
        tick = ?config.market_tick_interval,
        "configuration loaded"
    );

    let state = state::AppState::new(config);
    let app = routes::app(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .inspect_err(|e| tracing::error!(%bind_addr, error = %e, "failed to bind"))?;

    tracing::info!(%bind_addr, "cryptoparty relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;
    tracing::info!("cryptoparty relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
