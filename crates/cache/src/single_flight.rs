//! Single-flight 注册表
//!
//! 同一个键同一时刻最多只有一个计算在执行，并发调用者共享同一个结果。
//!
//! - 计算在独立的 tokio 任务中运行：领导者调用方被取消时计算仍会完成
//! - 结果投递与句柄移除在同一个临界区内完成：订阅者要么在移除前加入并收到结果，
//!   要么在移除后到达并成为新的领导者
//! - 计算任务 panic 或被运行时取消时，句柄同样会被移除，等待者收到 `Aborted`

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use lumen_errors::AppResult;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::FlightError;
use crate::metrics;

type FlightOutcome<T> = Result<T, FlightError>;
type InFlight<T> = Arc<Mutex<HashMap<String, broadcast::Sender<FlightOutcome<T>>>>>;

/// Single-flight 注册表
pub struct SingleFlight<T> {
    inflight: InFlight<T>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            inflight: self.inflight.clone(),
        }
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行或加入对 `key` 的计算，返回 (结果, 是否为领导者)
    pub async fn run_once<F, Fut>(&self, key: &str, compute: F) -> Result<(T, bool), FlightError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let (mut rx, leader) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(tx) => (tx.subscribe(), false),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    inflight.insert(key.to_string(), tx);
                    (rx, true)
                }
            }
        };
        metrics::record_single_flight(leader);

        if leader {
            let settle = SettleGuard {
                inflight: self.inflight.clone(),
                key: key.to_string(),
                settled: false,
            };
            tokio::spawn(async move {
                let mut settle = settle;
                let outcome = compute().await.map_err(|e| FlightError::Compute(Arc::new(e)));
                settle.settle(outcome);
            });
        } else {
            debug!(key, "Joined in-flight computation");
        }

        match rx.recv().await {
            Ok(outcome) => outcome.map(|value| (value, leader)),
            Err(_) => Err(FlightError::Aborted),
        }
    }

    /// 正在执行的计算数量
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inflight.lock().contains_key(key)
    }
}

/// 计算任务结束（正常、panic 或取消）时移除句柄并通知等待者
struct SettleGuard<T> {
    inflight: InFlight<T>,
    key: String,
    settled: bool,
}

impl<T> SettleGuard<T> {
    fn settle(&mut self, outcome: FlightOutcome<T>) {
        self.settled = true;
        let mut inflight = self.inflight.lock();
        if let Some(tx) = inflight.remove(&self.key) {
            // 所有接收端都已放弃时发送失败，无需处理
            let _ = tx.send(outcome);
        }
    }
}

impl<T> Drop for SettleGuard<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(key = %self.key, "In-flight computation aborted before settling");
        let mut inflight = self.inflight.lock();
        if let Some(tx) = inflight.remove(&self.key) {
            let _ = tx.send(Err(FlightError::Aborted));
        }
    }
}
