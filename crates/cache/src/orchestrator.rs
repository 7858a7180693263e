//! get-or-compute 组合入口
//!
//! 1. 先查缓存，命中直接返回
//! 2. 未命中则进入单飞：领导者在计算前再查一次缓存，仍未命中才执行计算
//! 3. 计算成功后先写缓存再通知等待者；写缓存失败只记录日志
//! 4. 计算失败不写缓存，下一次请求会重新计算

use std::future::Future;
use std::sync::Arc;

use lumen_errors::{AppError, AppResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::coordinator::CacheCoordinator;
use crate::error::FlightError;
use crate::fingerprint::Fingerprint;
use crate::single_flight::SingleFlight;

/// 结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Cache,
    Computed,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Computed => "computed",
        }
    }
}

/// 计算编排器
pub struct ComputationOrchestrator {
    coordinator: Arc<CacheCoordinator>,
    flights: SingleFlight<(String, SourceTag)>,
}

impl ComputationOrchestrator {
    pub fn new(coordinator: Arc<CacheCoordinator>) -> Self {
        Self {
            coordinator,
            flights: SingleFlight::new(),
        }
    }

    /// 读取缓存，未命中时以单飞方式计算并写入缓存
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        namespace: &str,
        compute: F,
    ) -> AppResult<(T, SourceTag)>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        if let Some(value) = self
            .coordinator
            .get_json::<T>(fingerprint.as_str(), namespace)
            .await?
        {
            return Ok((value, SourceTag::Cache));
        }

        let coordinator = self.coordinator.clone();
        let key = fingerprint.as_str().to_string();
        let ns = namespace.to_string();
        let flight_key = format!("{}:{}", namespace, fingerprint);

        let ((raw, source), leader) = self
            .flights
            .run_once(&flight_key, move || async move {
                // 上一轮领导者可能刚写完缓存并移除了句柄；这次复查不计入命中统计
                if let Some(raw) = coordinator.peek(&key, &ns).await? {
                    if serde_json::from_str::<T>(&raw).is_ok() {
                        return Ok((raw, SourceTag::Cache));
                    }
                }

                let value = compute().await?;
                let raw = serde_json::to_string(&value)?;
                if let Err(e) = coordinator.set(&key, &raw, None, &ns).await {
                    error!(namespace = %ns, key = %key, error = %e, "Failed to cache computed value");
                }
                Ok((raw, SourceTag::Computed))
            })
            .await?;

        let value = serde_json::from_str(&raw)
            .map_err(|e| AppError::from(FlightError::Serialization(e.to_string())))?;
        debug!(
            namespace,
            fingerprint = %fingerprint,
            leader,
            source = source.as_str(),
            "Computation settled"
        );
        Ok((value, source))
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    /// 正在执行的计算数量
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}
