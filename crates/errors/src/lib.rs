//! lumen-errors - 统一错误处理
//!
//! 基于 RFC 7807 Problem Details 规范；另外提供远程存储错误的分类

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Computation failed: {0}")]
    Compute(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn external_service(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Internal(_) => 500,
            Self::ExternalService(_) => 502,
            Self::ResourceExhausted(_) => 429,
            Self::Compute(_) => 503,
            Self::Serialization(_) => 500,
            Self::Config(_) => 500,
        }
    }

    /// 转换为 Problem Details
    pub fn to_problem_details(&self) -> ProblemDetails {
        ProblemDetails {
            r#type: self.problem_type(),
            title: self.problem_title(),
            status: self.status_code(),
            detail: self.to_string(),
            instance: None,
        }
    }

    fn problem_type(&self) -> String {
        let slug = match self {
            Self::NotFound(_) => "not-found",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Internal(_) => "internal",
            Self::ExternalService(_) => "external-service",
            Self::ResourceExhausted(_) => "resource-exhausted",
            Self::Compute(_) => "compute",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
        };
        format!("https://api.lumen.dev/problems/{}", slug)
    }

    fn problem_title(&self) -> String {
        match self {
            Self::NotFound(_) => "Resource Not Found",
            Self::Validation(_) => "Validation Error",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::Internal(_) => "Internal Server Error",
            Self::ExternalService(_) => "External Service Error",
            Self::ResourceExhausted(_) => "Resource Exhausted",
            Self::Compute(_) => "Computation Failed",
            Self::Serialization(_) => "Serialization Error",
            Self::Config(_) => "Configuration Error",
        }
        .to_string()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

/// 远程存储错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// 连接或命令超时
    Timeout,
    /// 连接被拒绝、断开或 IO 错误
    Connection,
    /// 服务端返回的协议级错误
    Protocol,
    /// 调用方错误（类型转换、脚本参数、客户端配置），属于程序缺陷
    Misuse,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Protocol => "protocol",
            Self::Misuse => "misuse",
        }
    }
}

/// 远程存储错误
///
/// 基础设施类错误（超时、连接、协议）由缓存协调器和限流器在本地降级吸收；
/// `Misuse` 表示代码缺陷，必须向上传播。
#[derive(Debug, Clone, Error)]
#[error("remote {} error: {message}", kind.as_str())]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Connection, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Protocol, message)
    }

    pub fn misuse(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Misuse, message)
    }

    /// 是否为可降级的基础设施错误
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self.kind, RemoteErrorKind::Misuse)
    }
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        if err.is_infrastructure() {
            Self::ExternalService(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

/// 远程操作 Result 类型别名
pub type RemoteResult<T> = Result<T, RemoteError>;
