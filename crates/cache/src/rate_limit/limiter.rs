//! 滑动窗口限流器
//!
//! 远程有序集合是共享的事实来源；远程出现基础设施错误时打开熔断并退回本地窗口，
//! 此时每个进程单独计数，有效额度暂时变宽。

use std::sync::Arc;
use std::time::Duration;

use lumen_config::RateLimitConfig;
use lumen_errors::AppResult;
use lumen_ports::{DualWindowOutcome, DualWindowRequest, RateWindowPort, WindowSpec};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::decision::{ClientKey, RateDecision, RateWindow};
use super::local::LocalWindowStore;
use super::policy::{EndpointLimit, RateLimitPolicy};
use crate::circuit::{CircuitBreaker, CircuitSnapshot};
use crate::clock::{SharedClock, duration_millis};
use crate::coordinator::Tier;
use crate::metrics;

/// 双窗口滑动限流器
pub struct SlidingWindowLimiter {
    remote: Arc<dyn RateWindowPort>,
    local: LocalWindowStore,
    policy: RateLimitPolicy,
    circuit: CircuitBreaker,
    clock: SharedClock,
    key_prefix: String,
    expiry_buffer: Duration,
    enabled: bool,
}

impl SlidingWindowLimiter {
    pub fn new(remote: Arc<dyn RateWindowPort>, policy: RateLimitPolicy, clock: SharedClock) -> Self {
        let config = RateLimitConfig::default();
        Self {
            remote,
            local: LocalWindowStore::new(Duration::from_secs(config.cleanup_interval_secs)),
            policy,
            circuit: CircuitBreaker::new("rate_limiter", Duration::ZERO, clock.clone()),
            clock,
            key_prefix: config.key_prefix,
            expiry_buffer: Duration::from_secs(config.expiry_buffer_secs),
            enabled: true,
        }
    }

    pub fn from_config(
        remote: Arc<dyn RateWindowPort>,
        config: &RateLimitConfig,
        probe_cooldown: Duration,
        clock: SharedClock,
    ) -> Self {
        Self::new(remote, RateLimitPolicy::from_config(config), clock)
            .with_key_prefix(config.key_prefix.clone())
            .with_expiry_buffer(Duration::from_secs(config.expiry_buffer_secs))
            .with_cleanup_interval(Duration::from_secs(config.cleanup_interval_secs))
            .with_probe_cooldown(probe_cooldown)
            .with_enabled(config.enabled)
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.local = LocalWindowStore::new(interval);
        self
    }

    pub fn with_probe_cooldown(mut self, cooldown: Duration) -> Self {
        self.circuit = CircuitBreaker::new("rate_limiter", cooldown, self.clock.clone());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 窗口键带 hash tag，保证同一客户端的两个窗口落在同一个集群槽位
    fn window_key(&self, client: &ClientKey, endpoint: &str, window: RateWindow) -> String {
        format!(
            "{}:{{{}:{}}}:{}",
            self.key_prefix,
            client,
            endpoint,
            window.secs()
        )
    }

    fn build_request(
        &self,
        client: &ClientKey,
        endpoint: &str,
        limit: EndpointLimit,
        now_ms: i64,
    ) -> DualWindowRequest {
        DualWindowRequest {
            primary: WindowSpec {
                key: self.window_key(client, endpoint, RateWindow::Minute),
                window_ms: RateWindow::Minute.millis(),
                limit: limit.per_minute,
            },
            secondary: WindowSpec {
                key: self.window_key(client, endpoint, RateWindow::Hour),
                window_ms: RateWindow::Hour.millis(),
                limit: limit.per_hour,
            },
            now_ms,
            member: format!("{}-{}", now_ms, Uuid::new_v4()),
            expiry_buffer_ms: duration_millis(self.expiry_buffer),
        }
    }

    /// 检查并记录一次请求
    pub async fn check_and_record(
        &self,
        client: &ClientKey,
        endpoint: &str,
    ) -> AppResult<RateDecision> {
        let limit = self.policy.limit_for(endpoint);
        let now = self.clock.now_millis();
        if !self.enabled {
            return Ok(RateDecision::unlimited(limit, now));
        }

        let request = self.build_request(client, endpoint, limit, now);
        let (outcome, tier) = self.evaluate(&request).await?;
        let decision = RateDecision::from_outcome(&outcome, limit, now, tier);

        let window = decision.exceeded().map(|w| w.as_str()).unwrap_or("none");
        metrics::record_rate_limit_decision(endpoint, window, decision.allowed());
        if decision.allowed() {
            debug!(
                client = %client,
                endpoint,
                minute_count = decision.minute_count,
                hour_count = decision.hour_count,
                tier = tier.as_str(),
                "Request allowed"
            );
        } else {
            warn!(
                client = %client,
                endpoint,
                window,
                minute_count = decision.minute_count,
                hour_count = decision.hour_count,
                tier = tier.as_str(),
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    async fn evaluate(&self, request: &DualWindowRequest) -> AppResult<(DualWindowOutcome, Tier)> {
        if self.circuit.should_try_remote() {
            match self.remote.check_and_record(request).await {
                Ok(outcome) => {
                    self.circuit.record_success();
                    return Ok((outcome, Tier::Remote));
                }
                Err(err) if err.is_infrastructure() => {
                    self.circuit.record_failure("check_and_record", &err);
                }
                Err(err) => {
                    error!(error = %err, "Rate window call rejected as a programming error");
                    return Err(err.into());
                }
            }
        }
        Ok((self.local.check_and_record(request), Tier::Local))
    }

    /// 清除某个客户端在某个接口上的两个窗口
    pub async fn reset(&self, client: &ClientKey, endpoint: &str) -> AppResult<()> {
        let keys = [
            self.window_key(client, endpoint, RateWindow::Minute),
            self.window_key(client, endpoint, RateWindow::Hour),
        ];
        self.local.clear(&keys);

        if self.circuit.should_try_remote() {
            match self.remote.clear(&keys).await {
                Ok(()) => self.circuit.record_success(),
                Err(err) if err.is_infrastructure() => self.circuit.record_failure("clear", &err),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.circuit.snapshot()
    }
}
