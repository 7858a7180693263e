//! lumen-adapter-redis - Redis 适配器
//!
//! 远程缓存与滑动窗口计数的 Redis 实现。所有命令都有超时上限，
//! 错误按 `RemoteErrorKind` 分类后返回，由上层决定降级还是传播。

mod cache;
mod config;
mod connection;
mod error;
mod rate_window;

pub use cache::*;
pub use config::*;
pub use connection::*;
pub use error::classify_redis_error;
pub use rate_window::*;
