//! 单飞计算错误

use std::sync::Arc;

use lumen_errors::AppError;
use thiserror::Error;

/// 单飞计算的失败结果，领导者与所有跟随者收到同一个值
#[derive(Debug, Clone, Error)]
pub enum FlightError {
    /// 计算函数返回错误
    #[error("computation failed: {0}")]
    Compute(Arc<AppError>),

    /// 领导者任务在给出结果前被取消或 panic
    #[error("computation aborted before settling")]
    Aborted,

    /// 计算结果无法序列化或反序列化
    #[error("computation result serialization failed: {0}")]
    Serialization(String),
}

impl From<FlightError> for AppError {
    fn from(err: FlightError) -> Self {
        match err {
            FlightError::Compute(inner) => {
                Arc::try_unwrap(inner).unwrap_or_else(|shared| (*shared).clone())
            }
            FlightError::Aborted => AppError::compute("computation aborted before settling"),
            FlightError::Serialization(msg) => AppError::serialization(msg),
        }
    }
}
