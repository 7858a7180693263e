//! 路由装配与运维接口

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lumen_cache::{CacheStats, CircuitSnapshot, ClientKey};
use lumen_errors::AppError;
use lumen_telemetry::HealthStatus;
use serde::{Deserialize, Serialize};

use crate::admin::require_admin_token;
use crate::cache_api;
use crate::error::ApiError;
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;

/// 受限流保护的业务路由
pub fn api_routes() -> Router<AppState> {
    Router::new().route(
        "/api/cache/{namespace}/{key}",
        get(cache_api::get_entry)
            .put(cache_api::put_entry)
            .delete(cache_api::delete_entry),
    )
}

/// 公开的运维路由，不参与限流
pub fn ops_routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/metrics", get(render_metrics))
}

/// 需要运维令牌的内部路由
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/internal/cache/stats", get(cache_stats))
        .route("/internal/rate-limit/reset", post(reset_rate_limit))
}

/// 组装完整路由：`api` 中的每条路由都经过限流中间件，内部路由都经过令牌校验
pub fn build_router(state: AppState, api: Router<AppState>) -> Router {
    let api = api.route_layer(middleware::from_fn_with_state(
        state.clone(),
        rate_limit_middleware,
    ));
    let admin = admin_routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        require_admin_token,
    ));

    Router::new()
        .merge(ops_routes())
        .merge(admin)
        .merge(api)
        .with_state(state)
}

/// 存活检查：远程层故障时服务仍在降级运行，所以始终返回 200
async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.runtime.health().await)
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_ratio: f64,
    pub remote: &'static str,
    pub circuit: CircuitSnapshot,
    pub in_flight: usize,
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let coordinator = &state.runtime.coordinator;
    let stats = coordinator.stats();
    Json(CacheStatsResponse {
        stats,
        hit_ratio: stats.hit_ratio(),
        remote: coordinator.remote_name(),
        circuit: coordinator.circuit(),
        in_flight: state.runtime.orchestrator.in_flight(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ResetRateLimitRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    pub endpoint: String,
}

async fn reset_rate_limit(
    State(state): State<AppState>,
    Json(body): Json<ResetRateLimitRequest>,
) -> Result<StatusCode, ApiError> {
    let client = match (body.user_id, body.ip) {
        (Some(user_id), _) => ClientKey::user(user_id),
        (None, Some(ip)) => ClientKey::ip(ip),
        (None, None) => {
            return Err(AppError::validation("Either user_id or ip is required").into());
        }
    };

    state.runtime.limiter.reset(&client, &body.endpoint).await?;
    tracing::info!(client = %client, endpoint = %body.endpoint, "Rate limit windows cleared");
    Ok(StatusCode::NO_CONTENT)
}
