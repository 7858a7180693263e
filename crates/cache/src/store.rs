//! 本地 TimedEntry 存储
//!
//! 每个命名空间一个 LRU 分区，条目带独立过期时间。纯内存、无 I/O；
//! 所有操作都在一把短锁内完成。分区清空后即被移除。
//!
//! 远程不可用期间写入的条目标记为未同步，远程恢复后由协调器回写。

use std::collections::HashMap;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{SharedClock, duration_millis};
use crate::namespace::NamespaceTable;

#[derive(Debug, Clone)]
struct TimedEntry {
    value: String,
    expires_at_ms: Option<i64>,
    /// 尚未写入远程存储
    unsynced: bool,
}

impl TimedEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }

    fn remaining_ttl(&self, now_ms: i64) -> Option<Duration> {
        self.expires_at_ms
            .map(|at| Duration::from_millis(u64::try_from(at.saturating_sub(now_ms)).unwrap_or(0)))
    }
}

type Partition = LruCache<String, TimedEntry>;

/// 按命名空间分区的本地缓存（LRU + TTL）
pub struct TimedEntryStore {
    namespaces: NamespaceTable,
    clock: SharedClock,
    partitions: Mutex<HashMap<String, Partition>>,
}

impl TimedEntryStore {
    pub fn new(namespaces: NamespaceTable, clock: SharedClock) -> Self {
        Self {
            namespaces,
            clock,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// 读取并刷新 LRU 顺序；过期条目在此被移除
    pub fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        let mut partitions = self.partitions.lock();
        let partition = partitions.get_mut(namespace)?;

        match partition.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        partition.pop(key);
        drop_if_empty(&mut partitions, namespace);
        None
    }

    /// 写入条目，`ttl` 为 None 表示不过期；超出容量时淘汰最久未使用的条目
    pub fn set(&self, namespace: &str, key: &str, value: String, ttl: Option<Duration>) {
        let now = self.clock.now_millis();
        let entry = TimedEntry {
            value,
            expires_at_ms: ttl.map(|ttl| now.saturating_add(duration_millis(ttl))),
            unsynced: false,
        };

        let mut partitions = self.partitions.lock();
        let partition = partitions
            .entry(namespace.to_string())
            .or_insert_with(|| LruCache::new(self.namespaces.policy(namespace).local_max_entries));

        // 满了先清理过期条目，尽量不淘汰仍然有效的
        if partition.len() >= partition.cap().get() && !partition.contains(key) {
            purge_partition(partition, now);
        }

        if let Some((evicted, _)) = partition.push(key.to_string(), entry) {
            if evicted != key {
                debug!(namespace, key = %evicted, "Local cache entry evicted");
            }
        }
    }

    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let mut partitions = self.partitions.lock();
        let removed = partitions
            .get_mut(namespace)
            .and_then(|partition| partition.pop(key))
            .is_some();
        drop_if_empty(&mut partitions, namespace);
        removed
    }

    /// 标记条目尚未写入远程
    pub fn mark_unsynced(&self, namespace: &str, key: &str) {
        let mut partitions = self.partitions.lock();
        if let Some(entry) = partitions
            .get_mut(namespace)
            .and_then(|partition| partition.peek_mut(key))
        {
            entry.unsynced = true;
        }
    }

    /// 未同步且未过期的条目：(值, 剩余 TTL)
    pub fn unsynced(&self, namespace: &str, key: &str) -> Option<(String, Option<Duration>)> {
        let now = self.clock.now_millis();
        let partitions = self.partitions.lock();
        let entry = partitions.get(namespace)?.peek(key)?;
        (entry.unsynced && !entry.is_expired(now))
            .then(|| (entry.value.clone(), entry.remaining_ttl(now)))
    }

    /// 回写成功后清除标记；值已被覆盖时保持不变
    pub fn mark_synced(&self, namespace: &str, key: &str, value: &str) {
        let mut partitions = self.partitions.lock();
        if let Some(entry) = partitions
            .get_mut(namespace)
            .and_then(|partition| partition.peek_mut(key))
        {
            if entry.value == value {
                entry.unsynced = false;
            }
        }
    }

    /// 检查存在性，不影响 LRU 顺序
    pub fn exists(&self, namespace: &str, key: &str) -> bool {
        let now = self.clock.now_millis();
        let mut partitions = self.partitions.lock();
        let Some(partition) = partitions.get_mut(namespace) else {
            return false;
        };

        match partition.peek(key) {
            Some(entry) if !entry.is_expired(now) => true,
            Some(_) => {
                partition.pop(key);
                drop_if_empty(&mut partitions, namespace);
                false
            }
            None => false,
        }
    }

    /// 清理某个命名空间的过期条目，返回清理数量
    pub fn purge_expired(&self, namespace: &str) -> usize {
        let now = self.clock.now_millis();
        let mut partitions = self.partitions.lock();
        let purged = partitions
            .get_mut(namespace)
            .map(|partition| purge_partition(partition, now))
            .unwrap_or(0);
        drop_if_empty(&mut partitions, namespace);
        purged
    }

    /// 清理所有命名空间的过期条目
    pub fn purge_all_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut partitions = self.partitions.lock();
        let purged = partitions
            .values_mut()
            .map(|partition| purge_partition(partition, now))
            .sum();
        partitions.retain(|_, partition| !partition.is_empty());
        purged
    }

    /// 某个命名空间中未过期的条目数
    pub fn len(&self, namespace: &str) -> usize {
        let now = self.clock.now_millis();
        let partitions = self.partitions.lock();
        partitions
            .get(namespace)
            .map(|partition| {
                partition
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }

    /// 当前持有条目的命名空间分区数
    pub fn partition_count(&self) -> usize {
        self.partitions.lock().len()
    }

    pub fn clear(&self) {
        self.partitions.lock().clear();
    }
}

fn drop_if_empty(partitions: &mut HashMap<String, Partition>, namespace: &str) {
    if partitions.get(namespace).is_some_and(|partition| partition.is_empty()) {
        partitions.remove(namespace);
    }
}

fn purge_partition(partition: &mut Partition, now_ms: i64) -> usize {
    let expired: Vec<String> = partition
        .iter()
        .filter(|(_, entry)| entry.is_expired(now_ms))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        partition.pop(key);
    }
    expired.len()
}
