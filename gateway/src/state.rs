//! 共享状态

use std::sync::Arc;

use lumen_cache::CacheRuntime;
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::Secret;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<CacheRuntime>,
    /// 未安装 Prometheus recorder 时（例如测试）为 None
    pub metrics: Option<PrometheusHandle>,
    /// 运维接口令牌，None 表示运维接口关闭
    pub admin_token: Option<Arc<Secret<String>>>,
}

impl AppState {
    pub fn new(runtime: Arc<CacheRuntime>) -> Self {
        Self {
            runtime,
            metrics: None,
            admin_token: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_admin_token(mut self, token: Secret<String>) -> Self {
        self.admin_token = Some(Arc::new(token));
        self
    }
}
