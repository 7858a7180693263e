//! 远程缓存 trait 定义

use async_trait::async_trait;
use lumen_errors::RemoteResult;
use std::time::Duration;

/// 远程与本地条目允许的最长 TTL（100 年），更长的 TTL 会被截断到这个值
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// 远程共享键值存储
///
/// 只需要 `GET` / `SET key value EX ttl` / `DEL` / `EXISTS` 四个原语。
/// 实现方必须为每次调用设置有界超时，超时以 `RemoteErrorKind::Timeout` 返回。
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait RemoteCachePort: Send + Sync {
    /// 获取缓存值
    async fn get(&self, key: &str) -> RemoteResult<Option<String>>;

    /// 设置缓存值，`ttl` 为 None 时永不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RemoteResult<()>;

    /// 删除缓存
    async fn delete(&self, key: &str) -> RemoteResult<()>;

    /// 检查是否存在
    async fn exists(&self, key: &str) -> RemoteResult<bool>;

    /// 后端名称（用于日志和指标）
    fn name(&self) -> &'static str {
        "remote"
    }
}
