//! 缓存命名空间策略

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use lumen_config::{CacheConfig, NamespaceConfig};

/// 单个命名空间的 TTL 与本地容量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespacePolicy {
    pub ttl: Duration,
    pub local_max_entries: NonZeroUsize,
}

impl NamespacePolicy {
    pub fn new(ttl: Duration, local_max_entries: usize) -> Self {
        Self {
            ttl,
            local_max_entries: NonZeroUsize::new(local_max_entries).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&NamespaceConfig> for NamespacePolicy {
    fn from(config: &NamespaceConfig) -> Self {
        Self::new(
            Duration::from_secs(config.ttl_secs),
            config.local_max_entries,
        )
    }
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self::from(&NamespaceConfig::default())
    }
}

/// 命名空间策略表，未登记的命名空间使用默认策略
#[derive(Debug, Clone, Default)]
pub struct NamespaceTable {
    default: NamespacePolicy,
    entries: HashMap<String, NamespacePolicy>,
}

impl NamespaceTable {
    pub fn new(default: NamespacePolicy) -> Self {
        Self {
            default,
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, namespace: impl Into<String>, policy: NamespacePolicy) -> Self {
        self.entries.insert(namespace.into(), policy);
        self
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let entries = config
            .effective_namespaces()
            .iter()
            .map(|(name, ns)| (name.clone(), NamespacePolicy::from(ns)))
            .collect();
        Self {
            default: NamespacePolicy::from(&config.default),
            entries,
        }
    }

    pub fn policy(&self, namespace: &str) -> NamespacePolicy {
        self.entries
            .get(namespace)
            .copied()
            .unwrap_or(self.default)
    }

    /// 是否为显式登记的命名空间
    pub fn contains(&self, namespace: &str) -> bool {
        self.entries.contains_key(namespace)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_namespaces_from_config() {
        let table = NamespaceTable::from_config(&CacheConfig::default());

        assert_eq!(table.policy("lessons").ttl, Duration::from_secs(86_400));
        assert_eq!(table.policy("tts").ttl, Duration::from_secs(604_800));
        assert_eq!(table.policy("history").ttl, Duration::from_secs(300));
        assert_eq!(table.policy("popular").local_max_entries.get(), 100);
    }

    #[test]
    fn test_unknown_namespace_uses_default() {
        let table = NamespaceTable::new(NamespacePolicy::new(Duration::from_secs(42), 7))
            .with("lessons", NamespacePolicy::new(Duration::from_secs(1), 1));

        assert_eq!(table.policy("quiz").ttl, Duration::from_secs(42));
        assert_eq!(table.policy("quiz").local_max_entries.get(), 7);
        assert_eq!(table.policy("lessons").ttl, Duration::from_secs(1));
        assert!(table.contains("lessons"));
        assert!(!table.contains("quiz"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let policy = NamespacePolicy::new(Duration::from_secs(1), 0);
        assert_eq!(policy.local_max_entries.get(), 1);
    }
}
