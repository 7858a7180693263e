//! Redis 连接管理
//!
//! 连接按需建立：进程启动时 Redis 不可用并不妨碍之后恢复。
//! 同一时刻只有一个调用者尝试建连。其余调用者在建连超时内等待结果，
//! 等待期间那次建连失败时直接返回连接错误，不会再各自重连一次。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lumen_errors::{RemoteError, RemoteResult};
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::RedisAdapterConfig;
use crate::error::classify_redis_error;

/// 单次建连闸门：缓存已建立的连接，并让并发调用者共享同一次建连
pub(crate) struct ConnectGate<T> {
    cached: RwLock<Option<T>>,
    connecting: Mutex<()>,
    failures: AtomicU64,
}

impl<T: Clone> ConnectGate<T> {
    pub(crate) fn new() -> Self {
        Self {
            cached: RwLock::new(None),
            connecting: Mutex::new(()),
            failures: AtomicU64::new(0),
        }
    }

    fn cached(&self) -> Option<T> {
        self.cached.read().clone()
    }

    /// 返回已缓存的连接，否则建连；`wait` 是排队等待建连权的上限
    pub(crate) async fn get_or_connect<F, Fut>(&self, wait: Duration, connect: F) -> RemoteResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        if let Some(conn) = self.cached() {
            return Ok(conn);
        }

        let failures_seen = self.failures.load(Ordering::Acquire);
        let Ok(_guard) = timeout(wait, self.connecting.lock()).await else {
            return Err(RemoteError::timeout(format!(
                "waited {}ms for Redis connection",
                wait.as_millis()
            )));
        };

        // 排队期间其他调用者可能已经连上
        if let Some(conn) = self.cached() {
            return Ok(conn);
        }
        if self.failures.load(Ordering::Acquire) != failures_seen {
            return Err(RemoteError::connection(
                "Redis connection attempt failed while waiting",
            ));
        }

        match connect().await {
            Ok(conn) => {
                *self.cached.write() = Some(conn.clone());
                Ok(conn)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }
}

/// 惰性 Redis 连接器
pub struct RedisConnector {
    client: Client,
    config: RedisAdapterConfig,
    gate: ConnectGate<ConnectionManager>,
}

impl RedisConnector {
    /// 创建连接器（不会立即连接）
    pub fn new(config: RedisAdapterConfig) -> RemoteResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| RemoteError::misuse(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            config,
            gate: ConnectGate::new(),
        })
    }

    pub fn config(&self) -> &RedisAdapterConfig {
        &self.config
    }

    /// 获取连接，必要时建立
    pub async fn connection(&self) -> RemoteResult<ConnectionManager> {
        let connect_timeout = self.config.connect_timeout;
        self.gate
            .get_or_connect(connect_timeout, || self.connect(connect_timeout))
            .await
    }

    async fn connect(&self, connect_timeout: Duration) -> RemoteResult<ConnectionManager> {
        match timeout(connect_timeout, ConnectionManager::new(self.client.clone())).await {
            Ok(Ok(conn)) => {
                debug!("Redis connection established");
                Ok(conn)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to connect to Redis");
                Err(classify_redis_error("connect", &e))
            }
            Err(_) => {
                warn!(
                    timeout_ms = connect_timeout.as_millis() as u64,
                    "Timed out connecting to Redis"
                );
                Err(RemoteError::timeout(format!(
                    "redis connect timed out after {}ms",
                    connect_timeout.as_millis()
                )))
            }
        }
    }

    /// 在命令超时内执行一次 Redis 操作
    pub async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> RemoteResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;

        match timeout(self.config.response_timeout, f(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_redis_error(op, &e)),
            Err(_) => Err(RemoteError::timeout(format!(
                "redis {} timed out after {}ms",
                op,
                self.config.response_timeout.as_millis()
            ))),
        }
    }

    /// 检查 Redis 连接
    pub async fn ping(&self) -> RemoteResult<()> {
        self.run("ping", |mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_errors::RemoteErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_invalid_url_is_misuse() {
        let err = RedisConnector::new(RedisAdapterConfig::new("not a url"))
            .err()
            .unwrap();
        assert_eq!(err.kind, RemoteErrorKind::Misuse);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_connect() {
        let gate = Arc::new(ConnectGate::<u32>::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let connect = |attempts: Arc<AtomicUsize>| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(7)
        };
        let (a, b) = tokio::join!(
            gate.get_or_connect(Duration::from_secs(1), || connect(attempts.clone())),
            gate.get_or_connect(Duration::from_secs(1), || connect(attempts.clone())),
        );

        assert_eq!((a.unwrap(), b.unwrap()), (7, 7));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiter_fails_fast_after_failed_connect() {
        let gate = Arc::new(ConnectGate::<u32>::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let connect = |attempts: Arc<AtomicUsize>| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(RemoteError::connection("refused"))
        };
        let (a, b) = tokio::join!(
            gate.get_or_connect(Duration::from_secs(1), || connect(attempts.clone())),
            gate.get_or_connect(Duration::from_secs(1), || connect(attempts.clone())),
        );

        assert_eq!(a.unwrap_err().kind, RemoteErrorKind::Connection);
        assert_eq!(b.unwrap_err().kind, RemoteErrorKind::Connection);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // 下一轮调用重新尝试
        let err = gate
            .get_or_connect(Duration::from_secs(1), || connect(attempts.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Connection);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waiter_gives_up_after_wait_limit() {
        let gate = Arc::new(ConnectGate::<u32>::new());
        let slow = gate.get_or_connect(Duration::from_secs(1), || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        });
        let impatient = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gate.get_or_connect(Duration::from_millis(20), || async { Ok(2) })
                .await
        };

        let (slow, impatient) = tokio::join!(slow, impatient);
        assert_eq!(slow.unwrap(), 1);
        assert_eq!(impatient.unwrap_err().kind, RemoteErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_infrastructure_error() {
        // 保留端口 1 上不会有 Redis
        let config = RedisAdapterConfig::new("redis://127.0.0.1:1")
            .with_connect_timeout(Duration::from_millis(200));
        let connector = RedisConnector::new(config).unwrap();

        let err = connector.ping().await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_ping_live_server() {
        let connector = RedisConnector::new(RedisAdapterConfig::default()).unwrap();
        connector.ping().await.unwrap();
    }
}
