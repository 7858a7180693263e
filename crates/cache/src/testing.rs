//! 测试替身
//!
//! 端口的内存实现，可以随时切换为失败模式，用于模拟远程存储宕机与恢复。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lumen_errors::{RemoteError, RemoteErrorKind, RemoteResult};
use lumen_ports::{DualWindowOutcome, DualWindowRequest, RateWindowPort, RemoteCachePort};
use parking_lot::Mutex;

use crate::clock::{SharedClock, SystemClock, duration_millis};
use crate::rate_limit::LocalWindowStore;

#[derive(Debug, Default)]
struct FailureSwitch {
    kind: Mutex<Option<RemoteErrorKind>>,
    calls: AtomicUsize,
}

impl FailureSwitch {
    fn check(&self, op: &str) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.kind.lock() {
            Some(kind) => Err(RemoteError::new(kind, format!("simulated {} failure", op))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    ttl: Option<Duration>,
    expires_at_ms: Option<i64>,
}

/// 内存版远程缓存，遵守 TTL
pub struct InMemoryRemoteCache {
    clock: SharedClock,
    entries: Mutex<HashMap<String, StoredValue>>,
    failure: FailureSwitch,
}

impl InMemoryRemoteCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            failure: FailureSwitch::default(),
        }
    }

    /// `true` 时所有调用返回连接错误
    pub fn set_failing(&self, failing: bool) {
        self.fail_with(failing.then_some(RemoteErrorKind::Connection));
    }

    pub fn fail_with(&self, kind: Option<RemoteErrorKind>) {
        *self.failure.kind.lock() = kind;
    }

    /// 累计调用次数（含失败的调用）
    pub fn calls(&self) -> usize {
        self.failure.calls.load(Ordering::SeqCst)
    }

    /// 绕过失败开关直接读取未过期的值
    pub fn raw(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .get(key)
            .filter(|stored| stored.expires_at_ms.is_none_or(|at| at > now))
            .map(|stored| stored.value.clone())
    }

    /// 模拟其他进程删除
    pub fn remove_raw(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// 写入时使用的 TTL
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().get(key).and_then(|stored| stored.ttl)
    }
}

impl Default for InMemoryRemoteCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl RemoteCachePort for InMemoryRemoteCache {
    async fn get(&self, key: &str) -> RemoteResult<Option<String>> {
        self.failure.check("get")?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RemoteResult<()> {
        self.failure.check("set")?;
        let now = self.clock.now_millis();
        self.entries.lock().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                ttl,
                expires_at_ms: ttl.map(|ttl| now.saturating_add(duration_millis(ttl))),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> RemoteResult<()> {
        self.failure.check("delete")?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> RemoteResult<bool> {
        self.failure.check("exists")?;
        Ok(self.raw(key).is_some())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// 内存版远程滑动窗口，判定逻辑与本地窗口相同
pub struct InMemoryRateWindow {
    windows: LocalWindowStore,
    failure: FailureSwitch,
}

impl InMemoryRateWindow {
    pub fn new() -> Self {
        Self {
            windows: LocalWindowStore::new(Duration::from_secs(60)),
            failure: FailureSwitch::default(),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_with(failing.then_some(RemoteErrorKind::Connection));
    }

    pub fn fail_with(&self, kind: Option<RemoteErrorKind>) {
        *self.failure.kind.lock() = kind;
    }

    pub fn calls(&self) -> usize {
        self.failure.calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryRateWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateWindowPort for InMemoryRateWindow {
    async fn check_and_record(
        &self,
        request: &DualWindowRequest,
    ) -> RemoteResult<DualWindowOutcome> {
        self.failure.check("check_and_record")?;
        Ok(self.windows.check_and_record(request))
    }

    async fn clear(&self, keys: &[String]) -> RemoteResult<()> {
        self.failure.check("clear")?;
        self.windows.clear(keys);
        Ok(())
    }
}
