//! Redis 适配器配置

use std::time::Duration;

/// Redis 适配器配置
#[derive(Debug, Clone)]
pub struct RedisAdapterConfig {
    /// Redis URL
    pub url: String,
    /// 建立连接的超时
    pub connect_timeout: Duration,
    /// 单条命令（含脚本）的总超时
    pub response_timeout: Duration,
    /// 键前缀
    pub key_prefix: Option<String>,
}

impl Default for RedisAdapterConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_millis(500),
            response_timeout: Duration::from_millis(250),
            key_prefix: None,
        }
    }
}

impl RedisAdapterConfig {
    /// 创建新的配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置连接超时
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 设置命令超时
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// 设置键前缀，空字符串等同于不设置
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.key_prefix = if prefix.is_empty() { None } else { Some(prefix) };
        self
    }

    /// 获取带前缀的键
    pub fn prefixed_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}
