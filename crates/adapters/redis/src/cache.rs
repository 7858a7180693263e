//! Redis Cache 实现

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lumen_errors::RemoteResult;
use lumen_ports::{MAX_TTL, RemoteCachePort};
use redis::AsyncCommands;

use crate::connection::RedisConnector;

/// Redis Cache
pub struct RedisCache {
    connector: Arc<RedisConnector>,
}

impl RedisCache {
    pub fn new(connector: Arc<RedisConnector>) -> Self {
        Self { connector }
    }

    fn key(&self, key: &str) -> String {
        self.connector.config().prefixed_key(key)
    }
}

/// PSETEX 的毫秒参数，限制在 [1, MAX_TTL]
fn ttl_millis(ttl: Duration) -> u64 {
    let millis = ttl.min(MAX_TTL).as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl RemoteCachePort for RedisCache {
    async fn get(&self, key: &str) -> RemoteResult<Option<String>> {
        let key = self.key(key);
        self.connector
            .run("get", |mut conn| async move { conn.get(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RemoteResult<()> {
        let key = self.key(key);
        let value = value.to_string();
        match ttl {
            // 毫秒精度；不足 1ms 按 1ms，超过 MAX_TTL 截断，避免 PSETEX 报错
            Some(duration) => {
                let millis = ttl_millis(duration);
                self.connector
                    .run("set", |mut conn| async move {
                        conn.pset_ex(key, value, millis).await
                    })
                    .await
            }
            None => {
                self.connector
                    .run("set", |mut conn| async move { conn.set(key, value).await })
                    .await
            }
        }
    }

    async fn delete(&self, key: &str) -> RemoteResult<()> {
        let key = self.key(key);
        self.connector
            .run("del", |mut conn| async move { conn.del(key).await })
            .await
    }

    async fn exists(&self, key: &str) -> RemoteResult<bool> {
        let key = self.key(key);
        self.connector
            .run("exists", |mut conn| async move { conn.exists(key).await })
            .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisAdapterConfig;

    fn live_cache() -> RedisCache {
        let config = RedisAdapterConfig::default().with_key_prefix("lumen-test");
        RedisCache::new(Arc::new(RedisConnector::new(config).unwrap()))
    }

    #[test]
    fn test_ttl_millis_is_clamped() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(
            ttl_millis(Duration::from_secs(u64::MAX)),
            MAX_TTL.as_millis() as u64
        );
    }

    #[test]
    fn test_keys_are_prefixed() {
        let cache = live_cache();
        assert_eq!(cache.key("math:abc"), "lumen-test:math:abc");
        assert_eq!(cache.name(), "redis");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_set_get_delete_roundtrip() {
        let cache = live_cache();
        let key = format!("roundtrip:{}", uuid::Uuid::new_v4());

        cache
            .set(&key, "value", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("value"));
        assert!(cache.exists(&key).await.unwrap());

        cache.delete(&key).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(!cache.exists(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_ttl_expires_entry() {
        let cache = live_cache();
        let key = format!("ttl:{}", uuid::Uuid::new_v4());

        cache
            .set(&key, "short", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }
}
