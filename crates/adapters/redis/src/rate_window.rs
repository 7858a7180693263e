//! Redis 滑动窗口计数
//!
//! 每个 (client, endpoint, window) 一个有序集合，score 为请求时间（毫秒）。
//! 两个窗口在同一个 Lua 脚本里判定，保证跨实例的原子性。

use std::sync::Arc;

use async_trait::async_trait;
use lumen_errors::{RemoteError, RemoteResult};
use lumen_ports::{DualWindowOutcome, DualWindowRequest, RateWindowPort, WindowTally};
use redis::{AsyncCommands, Script};
use tracing::debug;

use crate::connection::RedisConnector;

const DUAL_WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local p_window = tonumber(ARGV[2])
local p_limit = tonumber(ARGV[3])
local s_window = tonumber(ARGV[4])
local s_limit = tonumber(ARGV[5])
local member = ARGV[6]
local buffer = tonumber(ARGV[7])

-- 移除窗口外的记录
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - p_window)
redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', now - s_window)

local p_count = redis.call('ZCARD', KEYS[1])
local s_count = redis.call('ZCARD', KEYS[2])

-- 主窗口拒绝时次窗口只统计不判定
local p_allowed = 0
local s_allowed = 1
if p_count < p_limit then
    p_allowed = 1
    if s_count >= s_limit then
        s_allowed = 0
    end
end

if p_allowed == 1 and s_allowed == 1 then
    redis.call('ZADD', KEYS[1], now, member)
    redis.call('ZADD', KEYS[2], now, member)
    p_count = p_count + 1
    s_count = s_count + 1
end

redis.call('PEXPIRE', KEYS[1], p_window + buffer)
redis.call('PEXPIRE', KEYS[2], s_window + buffer)

local function oldest(key)
    local entry = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    if #entry >= 2 then
        return tonumber(entry[2])
    end
    return -1
end

return {p_count, p_allowed, oldest(KEYS[1]), s_count, s_allowed, oldest(KEYS[2])}
"#;

/// Redis 滑动窗口存储
pub struct RedisRateWindow {
    connector: Arc<RedisConnector>,
    script: Script,
}

impl RedisRateWindow {
    pub fn new(connector: Arc<RedisConnector>) -> Self {
        Self {
            connector,
            script: Script::new(DUAL_WINDOW_SCRIPT),
        }
    }

    fn key(&self, key: &str) -> String {
        self.connector.config().prefixed_key(key)
    }
}

/// 解析脚本返回的六元组
fn parse_outcome(raw: &[i64]) -> RemoteResult<DualWindowOutcome> {
    let [p_count, p_allowed, p_oldest, s_count, s_allowed, s_oldest] = raw else {
        return Err(RemoteError::misuse(format!(
            "dual window script returned {} values, expected 6",
            raw.len()
        )));
    };

    let tally = |count: i64, allowed: i64, oldest: i64| WindowTally {
        count: count.max(0) as u64,
        allowed: allowed == 1,
        oldest_ms: (oldest >= 0).then_some(oldest),
    };

    Ok(DualWindowOutcome {
        primary: tally(*p_count, *p_allowed, *p_oldest),
        secondary: tally(*s_count, *s_allowed, *s_oldest),
    })
}

#[async_trait]
impl RateWindowPort for RedisRateWindow {
    async fn check_and_record(
        &self,
        request: &DualWindowRequest,
    ) -> RemoteResult<DualWindowOutcome> {
        let mut invocation = self.script.prepare_invoke();
        invocation
            .key(self.key(&request.primary.key))
            .key(self.key(&request.secondary.key))
            .arg(request.now_ms)
            .arg(request.primary.window_ms)
            .arg(request.primary.limit)
            .arg(request.secondary.window_ms)
            .arg(request.secondary.limit)
            .arg(&request.member)
            .arg(request.expiry_buffer_ms);

        let raw: Vec<i64> = self
            .connector
            .run("evalsha", |mut conn| async move {
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        let outcome = parse_outcome(&raw)?;
        debug!(
            primary_key = %request.primary.key,
            primary_count = outcome.primary.count,
            secondary_count = outcome.secondary.count,
            recorded = outcome.recorded(),
            "Dual window rate limit check"
        );
        Ok(outcome)
    }

    async fn clear(&self, keys: &[String]) -> RemoteResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        self.connector
            .run("del", |mut conn| async move { conn.del(keys).await })
            .await
    }
}
