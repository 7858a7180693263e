//! 限流中间件
//!
//! 显式挂在 API 路由上；客户端标识来自上游认证写入的 [`ClientIdentity`]，
//! 否则取代理头或连接地址。

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lumen_cache::{ClientKey, RateDecision};
use lumen_errors::AppError;

use crate::error::{ApiError, problem_response};
use crate::state::AppState;

/// 已认证用户，由上游认证层放入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_id: String,
}

impl ClientIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// 解析客户端标识
///
/// 优先级：ClientIdentity > X-Forwarded-For 第一个地址 > X-Real-IP > 连接地址 > "unknown"
pub fn client_key(request: &Request) -> ClientKey {
    if let Some(identity) = request.extensions().get::<ClientIdentity>() {
        return ClientKey::user(&identity.user_id);
    }

    if let Some(ip) = forwarded_ip(request.headers()) {
        return ClientKey::ip(ip);
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return ClientKey::ip(addr.ip());
    }

    ClientKey::ip("unknown")
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header_value("x-forwarded-for").or_else(|| header_value("x-real-ip"))
}

/// 限流中间件：需通过 `route_layer` 挂载，才能拿到匹配的路由模板
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let decision = match state.runtime.limiter.check_and_record(&client, &endpoint).await {
        Ok(decision) => decision,
        Err(err) => return ApiError(err).into_response(),
    };

    if !decision.allowed() {
        let retry_after = decision.retry_after_secs().unwrap_or_default();
        let problem = AppError::resource_exhausted(format!(
            "Rate limit exceeded, retry after {} seconds",
            retry_after
        ))
        .to_problem_details()
        .with_instance(endpoint);

        let mut response = problem_response(problem);
        add_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    add_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    for (name, value) in decision.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request() -> axum::http::request::Builder {
        axum::http::Request::builder().uri("/api/tts")
    }

    #[test]
    fn test_identity_wins_over_headers() {
        let req = request()
            .header("x-forwarded-for", "10.0.0.1")
            .extension(ClientIdentity::new("42"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req).as_str(), "user:42");
    }

    #[test]
    fn test_first_forwarded_address() {
        let req = request()
            .header("x-forwarded-for", " 10.0.0.1 , 172.16.0.9")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req).as_str(), "ip:10.0.0.1");
    }

    #[test]
    fn test_real_ip_then_connect_info() {
        let req = request()
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req).as_str(), "ip:192.168.1.1");

        let addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let req = request()
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req).as_str(), "ip:127.0.0.1");
    }

    #[test]
    fn test_unknown_client() {
        let req = request().body(Body::empty()).unwrap();
        assert_eq!(client_key(&req).as_str(), "ip:unknown");
    }
}
