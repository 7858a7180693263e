//! lumen-config - 配置加载库
//!
//! 配置在进程启动时加载一次：`default.toml` → `{APP_ENV}.toml` → `LUMEN_` 前缀的环境变量

use std::collections::HashMap;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// 内置缓存命名空间：(名称, TTL 秒, 本地最大条目数)
pub const BUILTIN_NAMESPACES: &[(&str, u64, usize)] = &[
    ("lessons", 86_400, 500),
    ("tts", 604_800, 200),
    ("math", 86_400, 1_000),
    ("history", 300, 1_000),
    ("popular", 600, 100),
];

/// 内置接口限流：(路径, 每分钟, 每小时)
pub const BUILTIN_ENDPOINT_LIMITS: &[(&str, u64, u64)] = &[
    ("/api/lessons/generate", 10, 100),
    ("/api/math/solve", 20, 300),
    ("/api/tts", 30, 500),
];

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `/internal/*` 运维接口的 Bearer 令牌，未配置时这些接口一律拒绝
    #[serde(default)]
    pub admin_token: Option<Secret<String>>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_token: None,
        }
    }
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: Secret<String>,
    /// 建立连接的超时（毫秒）
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// 单条命令的总超时（毫秒）
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_url() -> Secret<String> {
    Secret::new("redis://127.0.0.1:6379".to_string())
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_response_timeout_ms() -> u64 {
    250
}

fn default_redis_key_prefix() -> String {
    "lumen".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 生产环境使用 JSON 日志
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 单个命名空间的缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NamespaceConfig {
    pub ttl_secs: u64,
    pub local_max_entries: usize,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            local_max_entries: 1_000,
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 熔断打开后，再次探测远程存储前的冷却时间（毫秒），0 表示每次调用都探测
    #[serde(default = "default_probe_cooldown_ms")]
    pub probe_cooldown_ms: u64,
    /// 未登记命名空间使用的策略
    #[serde(default)]
    pub default: NamespaceConfig,
    /// 覆盖或新增的命名空间
    #[serde(default)]
    pub namespaces: HashMap<String, NamespaceConfig>,
}

fn default_probe_cooldown_ms() -> u64 {
    2_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            probe_cooldown_ms: default_probe_cooldown_ms(),
            default: NamespaceConfig::default(),
            namespaces: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// 内置命名空间叠加配置文件中的覆盖项
    pub fn effective_namespaces(&self) -> HashMap<String, NamespaceConfig> {
        let mut table: HashMap<String, NamespaceConfig> = BUILTIN_NAMESPACES
            .iter()
            .map(|(name, ttl_secs, local_max_entries)| {
                (
                    name.to_string(),
                    NamespaceConfig {
                        ttl_secs: *ttl_secs,
                        local_max_entries: *local_max_entries,
                    },
                )
            })
            .collect();
        table.extend(self.namespaces.iter().map(|(k, v)| (k.clone(), *v)));
        table
    }
}

/// 单个接口的限流额度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EndpointLimitConfig {
    pub per_minute: u64,
    pub per_hour: u64,
}

impl Default for EndpointLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1_000,
        }
    }
}

/// 限流配置
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit_key_prefix")]
    pub key_prefix: String,
    /// 远程有序集合的过期时间 = 窗口 + 缓冲
    #[serde(default = "default_expiry_buffer_secs")]
    pub expiry_buffer_secs: u64,
    /// 本地窗口表的机会式清理间隔
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default)]
    pub default: EndpointLimitConfig,
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointLimitConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_rate_limit_key_prefix() -> String {
    "rl".to_string()
}

fn default_expiry_buffer_secs() -> u64 {
    10
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            key_prefix: default_rate_limit_key_prefix(),
            expiry_buffer_secs: default_expiry_buffer_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            default: EndpointLimitConfig::default(),
            endpoints: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// 内置接口额度叠加配置文件中的覆盖项
    pub fn effective_endpoints(&self) -> HashMap<String, EndpointLimitConfig> {
        let mut table: HashMap<String, EndpointLimitConfig> = BUILTIN_ENDPOINT_LIMITS
            .iter()
            .map(|(path, per_minute, per_hour)| {
                (
                    path.to_string(),
                    EndpointLimitConfig {
                        per_minute: *per_minute,
                        per_hour: *per_hour,
                    },
                )
            })
            .collect();
        table.extend(self.endpoints.iter().map(|(k, v)| (k.clone(), *v)));
        table
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_app_name() -> String {
    "lumen".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_env: default_app_env(),
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            telemetry: TelemetryConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("LUMEN_").split("__"));

        Self::from_figment(figment)
    }

    /// 从任意 figment 提取配置
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        Ok(figment.extract()?)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
