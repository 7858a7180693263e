//! 组件装配
//!
//! 所有状态都挂在显式实例上，没有全局变量；测试可以并行创建多个互相隔离的运行时。

use std::sync::Arc;
use std::time::Duration;

use lumen_adapter_redis::{RedisAdapterConfig, RedisCache, RedisConnector, RedisRateWindow};
use lumen_config::AppConfig;
use lumen_errors::{AppError, AppResult};
use lumen_ports::{RateWindowPort, RemoteCachePort};
use lumen_telemetry::HealthStatus;
use secrecy::ExposeSecret;
use tracing::info;

use crate::clock::{SharedClock, SystemClock};
use crate::coordinator::CacheCoordinator;
use crate::namespace::NamespaceTable;
use crate::orchestrator::ComputationOrchestrator;
use crate::rate_limit::SlidingWindowLimiter;

/// 缓存、限流与编排器的组合根
pub struct CacheRuntime {
    pub coordinator: Arc<CacheCoordinator>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub orchestrator: Arc<ComputationOrchestrator>,
    connector: Option<Arc<RedisConnector>>,
}

impl CacheRuntime {
    /// 使用 Redis 作为远程层；连接按需建立，Redis 不可用不会阻止启动
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let adapter_config = RedisAdapterConfig::new(config.redis.url.expose_secret().as_str())
            .with_connect_timeout(Duration::from_millis(config.redis.connect_timeout_ms))
            .with_response_timeout(Duration::from_millis(config.redis.response_timeout_ms))
            .with_key_prefix(config.redis.key_prefix.clone());
        let connector = Arc::new(
            RedisConnector::new(adapter_config)
                .map_err(|e| AppError::config(format!("Invalid Redis configuration: {}", e)))?,
        );
        info!(
            connect_timeout_ms = config.redis.connect_timeout_ms,
            response_timeout_ms = config.redis.response_timeout_ms,
            "Redis connector created"
        );

        let remote_cache = Arc::new(RedisCache::new(connector.clone()));
        let rate_window = Arc::new(RedisRateWindow::new(connector.clone()));
        let mut runtime = Self::with_ports(config, remote_cache, rate_window, Arc::new(SystemClock));
        runtime.connector = Some(connector);
        Ok(runtime)
    }

    /// 使用任意远程端口实现装配
    pub fn with_ports(
        config: &AppConfig,
        remote_cache: Arc<dyn RemoteCachePort>,
        rate_window: Arc<dyn RateWindowPort>,
        clock: SharedClock,
    ) -> Self {
        let probe_cooldown = Duration::from_millis(config.cache.probe_cooldown_ms);
        let namespaces = NamespaceTable::from_config(&config.cache);

        let coordinator = Arc::new(CacheCoordinator::new(
            remote_cache,
            namespaces,
            probe_cooldown,
            clock.clone(),
        ));
        let limiter = Arc::new(SlidingWindowLimiter::from_config(
            rate_window,
            &config.rate_limit,
            probe_cooldown,
            clock,
        ));
        let orchestrator = Arc::new(ComputationOrchestrator::new(coordinator.clone()));

        info!(
            remote = coordinator.remote_name(),
            probe_cooldown_ms = config.cache.probe_cooldown_ms,
            rate_limit_enabled = config.rate_limit.enabled,
            "Cache runtime initialized"
        );

        Self {
            coordinator,
            limiter,
            orchestrator,
            connector: None,
        }
    }

    /// 健康状态：远程层不可用时服务仍以降级模式运行
    pub async fn health(&self) -> HealthStatus {
        let mut status = HealthStatus::new();

        if let Some(connector) = &self.connector {
            match connector.ping().await {
                Ok(()) => status.add_check("redis", true, None),
                Err(e) => status.add_check("redis", false, Some(e.to_string())),
            }
        }

        let cache = self.coordinator.circuit();
        status.add_check(
            "remote_cache",
            cache.remote_available,
            (!cache.remote_available).then(|| "serving from local fallback".to_string()),
        );

        let limiter = self.limiter.circuit();
        status.add_check(
            "rate_limiter",
            limiter.remote_available,
            (!limiter.remote_available).then(|| "counting in local windows".to_string()),
        );

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::ClientKey;
    use crate::testing::{InMemoryRateWindow, InMemoryRemoteCache};

    fn runtime() -> (CacheRuntime, Arc<InMemoryRemoteCache>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let remote = Arc::new(InMemoryRemoteCache::new(clock.clone()));
        let runtime = CacheRuntime::with_ports(
            &AppConfig::default(),
            remote.clone(),
            Arc::new(InMemoryRateWindow::new()),
            clock,
        );
        (runtime, remote)
    }

    #[tokio::test]
    async fn test_builtin_tables_are_wired() {
        let (runtime, remote) = runtime();

        runtime.coordinator.set("k", "v", None, "tts").await.unwrap();
        assert_eq!(remote.ttl_of("tts:k"), Some(Duration::from_secs(604_800)));

        let decision = runtime
            .limiter
            .check_and_record(&ClientKey::ip("1.1.1.1"), "/api/lessons/generate")
            .await
            .unwrap();
        assert_eq!(decision.limit.per_minute, 10);
        assert_eq!(decision.limit.per_hour, 100);
    }

    #[tokio::test]
    async fn test_health_reports_degraded_circuits() {
        let (runtime, remote) = runtime();
        assert!(runtime.health().await.healthy);

        remote.set_failing(true);
        runtime.coordinator.get("k", "lessons").await.unwrap();

        let health = runtime.health().await;
        assert!(!health.healthy);
        let cache = health
            .checks
            .iter()
            .find(|check| check.name == "remote_cache")
            .unwrap();
        assert!(!cache.healthy);
    }

    #[test]
    fn test_invalid_redis_url_is_config_error() {
        let mut config = AppConfig::default();
        config.redis.url = secrecy::Secret::new("not a url".to_string());

        let err = CacheRuntime::from_config(&config).err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_starts_without_reachable_redis() {
        let mut config = AppConfig::default();
        config.redis.url = secrecy::Secret::new("redis://127.0.0.1:1".to_string());
        config.redis.connect_timeout_ms = 100;

        let runtime = CacheRuntime::from_config(&config).unwrap();
        runtime.coordinator.set("k", "v", None, "lessons").await.unwrap();
        assert_eq!(
            runtime.coordinator.get("k", "lessons").await.unwrap().as_deref(),
            Some("v")
        );
        assert!(!runtime.health().await.healthy);
    }
}
