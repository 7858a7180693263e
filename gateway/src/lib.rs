//! lumen-gateway - HTTP 入口
//!
//! 限流中间件、缓存读写接口和运维接口

pub mod admin;
pub mod cache_api;
pub mod error;
pub mod rate_limit;
pub mod routing;
pub mod state;

pub use rate_limit::{ClientIdentity, client_key, rate_limit_middleware};
pub use admin::require_admin_token;
pub use routing::{admin_routes, api_routes, build_router, ops_routes};
pub use state::AppState;
