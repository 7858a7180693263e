//! 限流判定结果

use std::fmt;

use lumen_ports::{DualWindowOutcome, WindowTally};
use serde::Serialize;

use super::policy::EndpointLimit;
use crate::coordinator::Tier;

/// 客户端标识：`user:{id}` 或 `ip:{addr}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn user(id: impl fmt::Display) -> Self {
        Self(format!("user:{}", id))
    }

    pub fn ip(addr: impl fmt::Display) -> Self {
        Self(format!("ip:{}", addr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 限流窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateWindow {
    Minute,
    Hour,
}

impl RateWindow {
    pub fn secs(&self) -> u64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
        }
    }

    pub fn millis(&self) -> i64 {
        self.secs() as i64 * 1_000
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }
}

/// 一次 CheckAndRecord 的结果
///
/// 分钟窗口拒绝时小时窗口未参与判定，`allowed_hour` 为 true，`hour_count` 为只读统计值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed_minute: bool,
    pub allowed_hour: bool,
    pub minute_count: u64,
    pub hour_count: u64,
    pub limit: EndpointLimit,
    /// 分钟窗口重置时间（Unix 秒）
    pub minute_reset_at: i64,
    /// 小时窗口重置时间（Unix 秒）
    pub hour_reset_at: i64,
    /// 做出判定的存储层
    pub tier: Tier,
}

impl RateDecision {
    pub(crate) fn from_outcome(
        outcome: &DualWindowOutcome,
        limit: EndpointLimit,
        now_ms: i64,
        tier: Tier,
    ) -> Self {
        Self {
            allowed_minute: outcome.primary.allowed,
            allowed_hour: outcome.secondary.allowed,
            minute_count: outcome.primary.count,
            hour_count: outcome.secondary.count,
            limit,
            minute_reset_at: reset_at(&outcome.primary, RateWindow::Minute, now_ms),
            hour_reset_at: reset_at(&outcome.secondary, RateWindow::Hour, now_ms),
            tier,
        }
    }

    /// 限流关闭时的放行结果
    pub(crate) fn unlimited(limit: EndpointLimit, now_ms: i64) -> Self {
        Self {
            allowed_minute: true,
            allowed_hour: true,
            minute_count: 0,
            hour_count: 0,
            limit,
            minute_reset_at: ceil_secs(now_ms + RateWindow::Minute.millis()),
            hour_reset_at: ceil_secs(now_ms + RateWindow::Hour.millis()),
            tier: Tier::Local,
        }
    }

    pub fn allowed(&self) -> bool {
        self.allowed_minute && self.allowed_hour
    }

    /// 触发拒绝的窗口
    pub fn exceeded(&self) -> Option<RateWindow> {
        if !self.allowed_minute {
            Some(RateWindow::Minute)
        } else if !self.allowed_hour {
            Some(RateWindow::Hour)
        } else {
            None
        }
    }

    pub fn limit_of(&self, window: RateWindow) -> u64 {
        match window {
            RateWindow::Minute => self.limit.per_minute,
            RateWindow::Hour => self.limit.per_hour,
        }
    }

    pub fn remaining_in(&self, window: RateWindow) -> u64 {
        let count = match window {
            RateWindow::Minute => self.minute_count,
            RateWindow::Hour => self.hour_count,
        };
        self.limit_of(window).saturating_sub(count)
    }

    /// 对外报告的窗口：被拒绝的那个，否则剩余额度较少的那个
    pub fn binding_window(&self) -> RateWindow {
        self.exceeded().unwrap_or_else(|| {
            if self.remaining_in(RateWindow::Hour) < self.remaining_in(RateWindow::Minute) {
                RateWindow::Hour
            } else {
                RateWindow::Minute
            }
        })
    }

    pub fn remaining(&self) -> u64 {
        self.remaining_in(self.binding_window())
    }

    pub fn reset_at(&self) -> i64 {
        match self.binding_window() {
            RateWindow::Minute => self.minute_reset_at,
            RateWindow::Hour => self.hour_reset_at,
        }
    }

    /// 拒绝时建议的重试等待（秒），等于被超出窗口的长度
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.exceeded().map(|window| window.secs())
    }

    /// HTTP 响应头
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let window = self.binding_window();
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit_of(window).to_string()),
            ("X-RateLimit-Remaining", self.remaining().to_string()),
            ("X-RateLimit-Reset", self.reset_at().to_string()),
        ];
        if let Some(retry_after) = self.retry_after_secs() {
            headers.push(("Retry-After", retry_after.to_string()));
        }
        headers
    }
}

fn ceil_secs(ms: i64) -> i64 {
    (ms + 999).div_euclid(1_000)
}

fn reset_at(tally: &WindowTally, window: RateWindow, now_ms: i64) -> i64 {
    let start = tally.oldest_ms.unwrap_or(now_ms);
    ceil_secs(start + window.millis())
}
