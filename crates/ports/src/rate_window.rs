//! 滑动窗口计数 trait 定义

use async_trait::async_trait;
use lumen_errors::RemoteResult;

/// 单个窗口的检查参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    /// 存储键（每个 client/endpoint/window 一个有序集合）
    pub key: String,
    /// 窗口长度（毫秒）
    pub window_ms: i64,
    /// 窗口内允许的最大请求数
    pub limit: u64,
}

/// 双窗口检查请求
///
/// 执行顺序：先修剪并统计 `primary`，超限则直接拒绝（`secondary` 只统计不判定）；
/// 否则修剪并统计 `secondary`，超限则拒绝；两者都通过时才同时写入 `member`。
/// 被拒绝的请求不占用配额。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualWindowRequest {
    pub primary: WindowSpec,
    pub secondary: WindowSpec,
    /// 当前时间（Unix 毫秒）
    pub now_ms: i64,
    /// 本次请求在有序集合中的唯一成员名
    pub member: String,
    /// 键的过期时间 = 窗口 + 该缓冲（毫秒）
    pub expiry_buffer_ms: i64,
}

/// 单个窗口的统计结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTally {
    /// 窗口内的请求数（若本次被记录则已包含本次）
    pub count: u64,
    /// 本窗口是否放行
    pub allowed: bool,
    /// 窗口内最早一条记录的时间（Unix 毫秒）
    pub oldest_ms: Option<i64>,
}

/// 双窗口检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualWindowOutcome {
    pub primary: WindowTally,
    pub secondary: WindowTally,
}

impl DualWindowOutcome {
    /// 两个窗口都放行时本次请求才被记录
    pub fn recorded(&self) -> bool {
        self.primary.allowed && self.secondary.allowed
    }
}

/// 远程滑动窗口存储
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait RateWindowPort: Send + Sync {
    /// 原子地执行 修剪 → 统计 → 判定 → 写入
    async fn check_and_record(&self, request: &DualWindowRequest)
    -> RemoteResult<DualWindowOutcome>;

    /// 清除指定键的全部记录
    async fn clear(&self, keys: &[String]) -> RemoteResult<()>;
}
