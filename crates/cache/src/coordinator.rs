//! 双层缓存协调器
//!
//! 远程存储可用时是唯一的事实来源；任何基础设施错误都会打开熔断并在本次调用中
//! 退回本地存储，调用方永远看不到远程故障。写入总是同时落到本地，
//! 所以 `set` 之后立即 `get` 一定能读到。
//!
//! 远程不可用期间写入的值标记为未同步。远程恢复后，本进程读到远程未命中时
//! 会把它回写到远程；在此之前其他进程看不到这个值。
//!
//! 远程键为 `{namespace}:{key}`，因此命名空间不能为空，也不能包含 `:`。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lumen_errors::{AppError, AppResult, RemoteError};
use lumen_ports::{MAX_TTL, RemoteCachePort};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::circuit::{CircuitBreaker, CircuitSnapshot};
use crate::clock::SharedClock;
use crate::metrics;
use crate::namespace::NamespaceTable;
use crate::store::TimedEntryStore;

/// 提供数据的存储层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Remote,
    Local,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    local_fallbacks: AtomicU64,
}

/// 累计统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// 被吸收的远程错误次数（含无法解码的缓存值）
    pub errors: u64,
    pub sets: u64,
    pub deletes: u64,
    /// 由本地存储处理的调用次数
    pub local_fallbacks: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 一次读取的结果
struct Lookup {
    value: Option<String>,
    tier: Tier,
    fell_back: bool,
}

/// 校验命名空间：远程键以 `:` 分隔命名空间与键
pub fn validate_namespace(namespace: &str) -> AppResult<()> {
    if namespace.is_empty() || namespace.contains(':') {
        return Err(AppError::validation(format!(
            "Invalid cache namespace {:?}: must be non-empty and must not contain ':'",
            namespace
        )));
    }
    Ok(())
}

/// 缓存协调器
pub struct CacheCoordinator {
    remote: Arc<dyn RemoteCachePort>,
    local: TimedEntryStore,
    namespaces: NamespaceTable,
    circuit: CircuitBreaker,
    stats: StatsCounters,
}

impl CacheCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteCachePort>,
        namespaces: NamespaceTable,
        probe_cooldown: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            remote,
            local: TimedEntryStore::new(namespaces.clone(), clock.clone()),
            namespaces,
            circuit: CircuitBreaker::new("cache", probe_cooldown, clock),
            stats: StatsCounters::default(),
        }
    }

    fn remote_key(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }

    /// 显式 TTL 优先，否则使用命名空间默认值；零表示不过期，超过 MAX_TTL 截断
    fn effective_ttl(&self, namespace: &str, ttl: Option<Duration>) -> Option<Duration> {
        let ttl = ttl.unwrap_or(self.namespaces.policy(namespace).ttl);
        (!ttl.is_zero()).then_some(ttl.min(MAX_TTL))
    }

    /// 基础设施错误：计数并打开熔断；调用方缺陷：向上传播
    fn absorb(&self, op: &'static str, err: RemoteError) -> AppResult<()> {
        if err.is_infrastructure() {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            self.circuit.record_failure(op, &err);
            Ok(())
        } else {
            error!(op, error = %err, "Remote cache call rejected as a programming error");
            Err(err.into())
        }
    }

    fn record_lookup(&self, namespace: &str, tier: Tier, hit: bool) {
        let counter = if hit {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(namespace, tier.as_str(), hit);
        debug!(namespace, tier = tier.as_str(), hit, "Cache lookup");
    }

    fn fall_back(&self) {
        self.stats.local_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// 远程未命中时，把远程不可用期间写入本地的条目回写到远程
    async fn write_back(&self, namespace: &str, key: &str) -> AppResult<Option<String>> {
        let Some((value, ttl)) = self.local.unsynced(namespace, key) else {
            return Ok(None);
        };

        match self
            .remote
            .set(&Self::remote_key(namespace, key), &value, ttl)
            .await
        {
            Ok(()) => {
                self.local.mark_synced(namespace, key, &value);
                debug!(namespace, key, "Wrote back entry cached during remote outage");
            }
            Err(err) => self.absorb("set", err)?,
        }
        Ok(Some(value))
    }

    async fn lookup(&self, key: &str, namespace: &str) -> AppResult<Lookup> {
        validate_namespace(namespace)?;

        if self.circuit.should_try_remote() {
            match self.remote.get(&Self::remote_key(namespace, key)).await {
                Ok(Some(value)) => {
                    self.circuit.record_success();
                    return Ok(Lookup {
                        value: Some(value),
                        tier: Tier::Remote,
                        fell_back: false,
                    });
                }
                Ok(None) => {
                    self.circuit.record_success();
                    let pending = self.write_back(namespace, key).await?;
                    let tier = if pending.is_some() {
                        Tier::Local
                    } else {
                        Tier::Remote
                    };
                    return Ok(Lookup {
                        value: pending,
                        tier,
                        fell_back: false,
                    });
                }
                Err(err) => self.absorb("get", err)?,
            }
        }

        Ok(Lookup {
            value: self.local.get(namespace, key),
            tier: Tier::Local,
            fell_back: true,
        })
    }

    /// 获取缓存值
    pub async fn get(&self, key: &str, namespace: &str) -> AppResult<Option<String>> {
        let lookup = self.lookup(key, namespace).await?;
        if lookup.fell_back {
            self.fall_back();
        }
        self.record_lookup(namespace, lookup.tier, lookup.value.is_some());
        Ok(lookup.value)
    }

    /// 与 `get` 相同的读取路径，但不计入命中/未命中统计
    pub(crate) async fn peek(&self, key: &str, namespace: &str) -> AppResult<Option<String>> {
        Ok(self.lookup(key, namespace).await?.value)
    }

    /// 写入缓存值，至少写入本地层
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        namespace: &str,
    ) -> AppResult<()> {
        validate_namespace(namespace)?;
        let ttl = self.effective_ttl(namespace, ttl);
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        self.local.set(namespace, key, value.to_string(), ttl);

        if self.circuit.should_try_remote() {
            match self
                .remote
                .set(&Self::remote_key(namespace, key), value, ttl)
                .await
            {
                Ok(()) => {
                    self.circuit.record_success();
                    return Ok(());
                }
                Err(err) => self.absorb("set", err)?,
            }
        }

        self.local.mark_unsynced(namespace, key);
        self.fall_back();
        Ok(())
    }

    /// 删除缓存值（两层都删）
    pub async fn delete(&self, key: &str, namespace: &str) -> AppResult<()> {
        validate_namespace(namespace)?;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        self.local.delete(namespace, key);

        if self.circuit.should_try_remote() {
            match self.remote.delete(&Self::remote_key(namespace, key)).await {
                Ok(()) => {
                    self.circuit.record_success();
                    return Ok(());
                }
                Err(err) => self.absorb("delete", err)?,
            }
        }

        self.fall_back();
        Ok(())
    }

    /// 检查是否存在
    pub async fn exists(&self, key: &str, namespace: &str) -> AppResult<bool> {
        validate_namespace(namespace)?;
        if self.circuit.should_try_remote() {
            match self.remote.exists(&Self::remote_key(namespace, key)).await {
                Ok(true) => {
                    self.circuit.record_success();
                    return Ok(true);
                }
                Ok(false) => {
                    self.circuit.record_success();
                    return Ok(self.write_back(namespace, key).await?.is_some());
                }
                Err(err) => self.absorb("exists", err)?,
            }
        }

        self.fall_back();
        Ok(self.local.exists(namespace, key))
    }

    /// 读取并反序列化；无法解码的值视为未命中并删除
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
        namespace: &str,
    ) -> AppResult<Option<T>> {
        let Some(raw) = self.get(key, namespace).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(namespace, key, error = %e, "Discarding undecodable cache entry");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.delete(key, namespace).await?;
                Ok(None)
            }
        }
    }

    /// 序列化后写入
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        namespace: &str,
    ) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl, namespace).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            local_fallbacks: self.stats.local_fallbacks.load(Ordering::Relaxed),
        }
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.circuit.snapshot()
    }

    pub fn local(&self) -> &TimedEntryStore {
        &self.local
    }

    pub fn namespaces(&self) -> &NamespaceTable {
        &self.namespaces
    }

    pub fn remote_name(&self) -> &'static str {
        self.remote.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::namespace::NamespacePolicy;
    use crate::testing::InMemoryRemoteCache;
    use lumen_errors::{AppError, RemoteErrorKind};
    use serde::Deserialize;

    fn coordinator(
        cooldown: Duration,
    ) -> (CacheCoordinator, Arc<InMemoryRemoteCache>, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let remote = Arc::new(InMemoryRemoteCache::new(Arc::new(clock.clone())));
        let table = NamespaceTable::new(NamespacePolicy::new(Duration::from_secs(60), 100))
            .with("lessons", NamespacePolicy::new(Duration::from_secs(86_400), 500));
        let coordinator =
            CacheCoordinator::new(remote.clone(), table, cooldown, Arc::new(clock.clone()));
        (coordinator, remote, clock)
    }

    #[tokio::test]
    async fn test_remote_is_source_of_truth_when_available() {
        let (cache, remote, _) = coordinator(Duration::ZERO);
        cache.set("k", "v", None, "lessons").await.unwrap();

        assert_eq!(remote.raw("lessons:k").as_deref(), Some("v"));
        assert_eq!(cache.get("k", "lessons").await.unwrap().as_deref(), Some("v"));

        // 其他进程删除了远程值，本地镜像不应遮盖远程
        remote.remove_raw("lessons:k");
        assert_eq!(cache.get("k", "lessons").await.unwrap(), None);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.errors), (1, 1, 0));
        assert_eq!(stats.local_fallbacks, 0);
    }

    #[tokio::test]
    async fn test_namespace_default_ttl_applies() {
        let (cache, remote, _) = coordinator(Duration::ZERO);
        cache.set("k", "v", None, "lessons").await.unwrap();
        cache.set("k", "v", None, "quiz").await.unwrap();
        cache
            .set("k", "v", Some(Duration::from_secs(5)), "history")
            .await
            .unwrap();

        assert_eq!(remote.ttl_of("lessons:k"), Some(Duration::from_secs(86_400)));
        assert_eq!(remote.ttl_of("quiz:k"), Some(Duration::from_secs(60)));
        assert_eq!(remote.ttl_of("history:k"), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_failure_opens_circuit_and_falls_back() {
        let (cache, remote, clock) = coordinator(Duration::from_secs(2));
        cache.set("k", "v", None, "lessons").await.unwrap();
        remote.set_failing(true);

        // 本地镜像接住读请求
        assert_eq!(cache.get("k", "lessons").await.unwrap().as_deref(), Some("v"));
        assert!(!cache.circuit().remote_available);
        let calls = remote.calls();

        // 冷却期内不再访问远程
        assert!(cache.exists("k", "lessons").await.unwrap());
        assert_eq!(remote.calls(), calls);

        // 远程恢复，冷却期后下一次调用顺带探测
        remote.set_failing(false);
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("k", "lessons").await.unwrap().as_deref(), Some("v"));
        assert!(cache.circuit().remote_available);

        let stats = cache.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.local_fallbacks, 2);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_both_tiers() {
        let (cache, remote, _) = coordinator(Duration::ZERO);
        cache.set("k", "v", None, "lessons").await.unwrap();
        cache.delete("k", "lessons").await.unwrap();

        assert_eq!(remote.raw("lessons:k"), None);
        assert!(!cache.local().exists("lessons", "k"));
        assert_eq!(cache.stats().deletes, 1);
    }

    #[tokio::test]
    async fn test_misuse_propagates_without_opening_circuit() {
        let (cache, remote, _) = coordinator(Duration::ZERO);
        remote.fail_with(Some(RemoteErrorKind::Misuse));

        let err = cache.get("k", "lessons").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(cache.circuit().remote_available);
        assert_eq!(cache.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_namespace_cannot_alias_another_namespace() {
        let (cache, remote, _) = coordinator(Duration::ZERO);

        let err = cache
            .set("y", "from-lessons:x", None, "lessons:x")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(matches!(
            cache.get("y", "").await.unwrap_err(),
            AppError::Validation(_)
        ));

        // 键本身可以包含 `:`
        assert_eq!(cache.get("x:y", "lessons").await.unwrap(), None);
        cache.set("x:y", "v", None, "lessons").await.unwrap();
        assert_eq!(remote.raw("lessons:x:y").as_deref(), Some("v"));
        assert_eq!(cache.stats().sets, 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_clamped() {
        let (cache, remote, clock) = coordinator(Duration::ZERO);
        cache
            .set("k", "v", Some(Duration::from_secs(u64::MAX)), "lessons")
            .await
            .unwrap();
        assert_eq!(remote.ttl_of("lessons:k"), Some(MAX_TTL));

        remote.set_failing(true);
        cache
            .set("j", "w", Some(Duration::from_secs(u64::MAX)), "lessons")
            .await
            .unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(cache.get("j", "lessons").await.unwrap().as_deref(), Some("w"));
    }

    #[tokio::test]
    async fn test_value_written_during_outage_survives_recovery() {
        let (cache, remote, _) = coordinator(Duration::ZERO);
        remote.set_failing(true);
        cache.set("k", "v", None, "lessons").await.unwrap();
        assert_eq!(remote.raw("lessons:k"), None);

        remote.set_failing(false);
        assert_eq!(cache.get("k", "lessons").await.unwrap().as_deref(), Some("v"));
        assert!(cache.circuit().remote_available);
        // 回写后远程成为事实来源
        assert_eq!(remote.raw("lessons:k").as_deref(), Some("v"));
        assert_eq!(cache.local().unsynced("lessons", "k"), None);

        remote.remove_raw("lessons:k");
        assert_eq!(cache.get("k", "lessons").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_exists_sees_value_written_during_outage() {
        let (cache, remote, _) = coordinator(Duration::ZERO);
        remote.set_failing(true);
        cache.set("k", "v", None, "lessons").await.unwrap();
        remote.set_failing(false);

        assert!(cache.exists("k", "lessons").await.unwrap());
        assert_eq!(remote.raw("lessons:k").as_deref(), Some("v"));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Lesson {
        topic: String,
        steps: Vec<String>,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let (cache, _, _) = coordinator(Duration::ZERO);
        let lesson = Lesson {
            topic: "gravity".to_string(),
            steps: vec!["drop".to_string(), "measure".to_string()],
        };
        cache.set_json("g", &lesson, None, "lessons").await.unwrap();

        let cached: Option<Lesson> = cache.get_json("g", "lessons").await.unwrap();
        assert_eq!(cached, Some(lesson));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss_and_deleted() {
        let (cache, remote, _) = coordinator(Duration::ZERO);
        cache.set("g", "not json", None, "lessons").await.unwrap();

        let cached: Option<Lesson> = cache.get_json("g", "lessons").await.unwrap();
        assert_eq!(cached, None);
        assert_eq!(remote.raw("lessons:g"), None);
        assert_eq!(cache.stats().errors, 1);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
