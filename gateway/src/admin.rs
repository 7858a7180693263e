//! 运维接口鉴权
//!
//! `/internal/*` 只接受携带 `Authorization: Bearer <admin_token>` 的请求。
//! 未配置令牌时这些接口整体关闭。

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lumen_errors::AppError;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

/// 运维令牌中间件，通过 `route_layer` 挂在运维路由上
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_ref() else {
        return ApiError(AppError::forbidden("Admin endpoints are disabled")).into_response();
    };

    let Some(presented) = bearer_token(request.headers()) else {
        return ApiError(AppError::unauthorized(
            "Authorization header must carry a Bearer token",
        ))
        .into_response();
    };

    if !tokens_match(presented, expected.expose_secret()) {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request with invalid token");
        return ApiError(AppError::unauthorized("Invalid admin token")).into_response();
    }

    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// 比较两个令牌的摘要，耗时与令牌内容无关
fn tokens_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
