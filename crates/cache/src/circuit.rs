//! 远程存储熔断标记
//!
//! 任意一次远程 I/O 失败即打开；冷却期过后由下一次调用顺带探测，
//! 探测成功即关闭。没有后台定时器。

use std::time::Duration;

use lumen_errors::RemoteError;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{SharedClock, duration_millis};
use crate::metrics;

#[derive(Debug, Clone, Copy)]
struct CircuitState {
    remote_available: bool,
    last_failure_at_ms: Option<i64>,
}

/// 熔断状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub remote_available: bool,
    pub last_failure_at_ms: Option<i64>,
}

pub struct CircuitBreaker {
    component: &'static str,
    probe_cooldown: Duration,
    clock: SharedClock,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    /// `probe_cooldown` 为零时每次调用都探测远程
    pub fn new(component: &'static str, probe_cooldown: Duration, clock: SharedClock) -> Self {
        Self {
            component,
            probe_cooldown,
            clock,
            state: Mutex::new(CircuitState {
                remote_available: true,
                last_failure_at_ms: None,
            }),
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    /// 本次调用是否应该尝试远程
    pub fn should_try_remote(&self) -> bool {
        let state = *self.state.lock();
        if state.remote_available {
            return true;
        }
        match state.last_failure_at_ms {
            Some(at) => {
                self.clock.now_millis().saturating_sub(at) >= duration_millis(self.probe_cooldown)
            }
            None => true,
        }
    }

    pub fn record_success(&self) {
        let recovered = {
            let mut state = self.state.lock();
            let was_open = !state.remote_available;
            state.remote_available = true;
            was_open
        };
        if recovered {
            info!(component = self.component, "Remote store recovered, circuit closed");
            metrics::record_circuit_transition(self.component, false);
        }
    }

    pub fn record_failure(&self, op: &str, err: &RemoteError) {
        let opened = {
            let mut state = self.state.lock();
            let was_available = state.remote_available;
            state.remote_available = false;
            state.last_failure_at_ms = Some(self.clock.now_millis());
            was_available
        };
        metrics::record_remote_error(self.component, op, err.kind.as_str());
        if opened {
            warn!(
                component = self.component,
                op,
                error = %err,
                "Remote store unavailable, circuit opened; falling back to local state"
            );
            metrics::record_circuit_transition(self.component, true);
        } else {
            warn!(component = self.component, op, error = %err, "Remote probe failed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.state.lock().remote_available
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = *self.state.lock();
        CircuitSnapshot {
            remote_available: state.remote_available,
            last_failure_at_ms: state.last_failure_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker(cooldown: Duration) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new(10_000);
        (
            CircuitBreaker::new("test", cooldown, Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn test_starts_closed() {
        let (circuit, _) = breaker(Duration::from_secs(2));
        assert!(circuit.is_available());
        assert!(circuit.should_try_remote());
        assert_eq!(circuit.snapshot().last_failure_at_ms, None);
    }

    #[test]
    fn test_failure_opens_until_cooldown_elapses() {
        let (circuit, clock) = breaker(Duration::from_secs(2));
        circuit.record_failure("get", &RemoteError::connection("refused"));

        assert!(!circuit.is_available());
        assert!(!circuit.should_try_remote());
        assert_eq!(circuit.snapshot().last_failure_at_ms, Some(10_000));

        clock.advance(Duration::from_millis(1_999));
        assert!(!circuit.should_try_remote());
        clock.advance(Duration::from_millis(1));
        assert!(circuit.should_try_remote());

        circuit.record_success();
        assert!(circuit.is_available());
    }

    #[test]
    fn test_zero_cooldown_probes_every_call() {
        let (circuit, _) = breaker(Duration::ZERO);
        circuit.record_failure("set", &RemoteError::timeout("slow"));
        assert!(!circuit.is_available());
        assert!(circuit.should_try_remote());
    }

    #[test]
    fn test_failed_probe_restarts_cooldown() {
        let (circuit, clock) = breaker(Duration::from_secs(1));
        circuit.record_failure("get", &RemoteError::connection("refused"));
        clock.advance(Duration::from_secs(1));
        assert!(circuit.should_try_remote());

        circuit.record_failure("get", &RemoteError::connection("refused"));
        assert!(!circuit.should_try_remote());
    }
}
