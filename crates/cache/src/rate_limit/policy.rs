//! 接口限流额度表

use std::collections::HashMap;

use lumen_config::{EndpointLimitConfig, RateLimitConfig};
use serde::Serialize;

/// 单个接口的双窗口额度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointLimit {
    pub per_minute: u64,
    pub per_hour: u64,
}

impl EndpointLimit {
    pub fn new(per_minute: u64, per_hour: u64) -> Self {
        Self {
            per_minute,
            per_hour,
        }
    }
}

impl From<&EndpointLimitConfig> for EndpointLimit {
    fn from(config: &EndpointLimitConfig) -> Self {
        Self::new(config.per_minute, config.per_hour)
    }
}

impl Default for EndpointLimit {
    fn default() -> Self {
        Self::from(&EndpointLimitConfig::default())
    }
}

/// 接口额度表，特定接口覆盖默认额度
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicy {
    default: EndpointLimit,
    endpoints: HashMap<String, EndpointLimit>,
}

impl RateLimitPolicy {
    pub fn new(default: EndpointLimit) -> Self {
        Self {
            default,
            endpoints: HashMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, limit: EndpointLimit) -> Self {
        self.endpoints.insert(endpoint.into(), limit);
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let endpoints = config
            .effective_endpoints()
            .iter()
            .map(|(path, limit)| (path.clone(), EndpointLimit::from(limit)))
            .collect();
        Self {
            default: EndpointLimit::from(&config.default),
            endpoints,
        }
    }

    /// 查找接口额度，未登记时回退到默认额度
    pub fn limit_for(&self, endpoint: &str) -> EndpointLimit {
        self.endpoints
            .get(endpoint)
            .or_else(|| self.endpoints.get(endpoint.trim_end_matches('/')))
            .copied()
            .unwrap_or(self.default)
    }

    pub fn default_limit(&self) -> EndpointLimit {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_overrides_default() {
        let policy = RateLimitPolicy::new(EndpointLimit::new(60, 1_000))
            .with_endpoint("/api/tts", EndpointLimit::new(30, 500));

        assert_eq!(policy.limit_for("/api/tts"), EndpointLimit::new(30, 500));
        assert_eq!(policy.limit_for("/api/tts/"), EndpointLimit::new(30, 500));
        assert_eq!(policy.limit_for("/api/other"), EndpointLimit::new(60, 1_000));
    }

    #[test]
    fn test_builtin_table_from_config() {
        let policy = RateLimitPolicy::from_config(&RateLimitConfig::default());

        assert_eq!(
            policy.limit_for("/api/lessons/generate"),
            EndpointLimit::new(10, 100)
        );
        assert_eq!(policy.limit_for("/api/math/solve"), EndpointLimit::new(20, 300));
        assert_eq!(policy.limit_for("/unknown"), EndpointLimit::new(60, 1_000));
    }
}
