//! Lumen Gateway

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lumen_cache::CacheRuntime;
use lumen_config::AppConfig;
use lumen_gateway::{AppState, api_routes, build_router};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config_dir = std::env::var("APP_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = AppConfig::load(&config_dir)?;

    if config.telemetry.json {
        lumen_telemetry::init_tracing_json(&config.telemetry.log_level)?;
    } else {
        lumen_telemetry::init_tracing(&config.telemetry.log_level)?;
    }
    let metrics = lumen_telemetry::init_metrics()?;

    info!(app = %config.app_name, env = %config.app_env, "Starting gateway");

    let runtime = Arc::new(CacheRuntime::from_config(&config)?);
    let mut state = AppState::new(runtime).with_metrics(metrics);
    match config.server.admin_token.clone() {
        Some(token) => state = state.with_admin_token(token),
        None => warn!("No admin token configured, /internal endpoints are disabled"),
    }

    let app = build_router(state, api_routes())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "Gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
