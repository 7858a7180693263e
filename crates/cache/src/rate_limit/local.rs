//! 本地滑动窗口存储
//!
//! 远程不可用时的降级实现，判定逻辑与远程脚本一致。每个键一个按时间追加的队列；
//! 调用间隔超过清理周期时顺带清理所有键，不依赖后台线程。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use lumen_ports::{DualWindowOutcome, DualWindowRequest, WindowSpec, WindowTally};
use parking_lot::Mutex;
use tracing::debug;

use crate::clock::duration_millis;

#[derive(Debug)]
struct LocalWindow {
    window_ms: i64,
    stamps: VecDeque<i64>,
}

impl LocalWindow {
    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while self.stamps.front().is_some_and(|&at| at <= cutoff) {
            self.stamps.pop_front();
        }
    }
}

#[derive(Debug, Default)]
struct LocalWindows {
    entries: HashMap<String, LocalWindow>,
    last_cleanup_ms: i64,
}

impl LocalWindows {
    /// 修剪并统计，返回 (数量, 最早时间)
    fn tally(&mut self, spec: &WindowSpec, now_ms: i64) -> (u64, Option<i64>) {
        match self.entries.get_mut(&spec.key) {
            Some(window) => {
                window.window_ms = spec.window_ms;
                window.prune(now_ms);
                (window.stamps.len() as u64, window.stamps.front().copied())
            }
            None => (0, None),
        }
    }

    fn record(&mut self, spec: &WindowSpec, now_ms: i64) -> Option<i64> {
        let window = self
            .entries
            .entry(spec.key.clone())
            .or_insert_with(|| LocalWindow {
                window_ms: spec.window_ms,
                stamps: VecDeque::new(),
            });
        window.stamps.push_back(now_ms);
        window.stamps.front().copied()
    }

    fn cleanup(&mut self, now_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, window| {
            window.prune(now_ms);
            !window.stamps.is_empty()
        });
        self.last_cleanup_ms = now_ms;
        before - self.entries.len()
    }
}

/// 进程内滑动窗口存储
pub struct LocalWindowStore {
    cleanup_interval_ms: i64,
    windows: Mutex<LocalWindows>,
}

impl LocalWindowStore {
    pub fn new(cleanup_interval: Duration) -> Self {
        Self {
            cleanup_interval_ms: duration_millis(cleanup_interval),
            windows: Mutex::new(LocalWindows::default()),
        }
    }

    /// 与远程脚本相同的 修剪 → 统计 → 判定 → 写入
    pub fn check_and_record(&self, request: &DualWindowRequest) -> DualWindowOutcome {
        let now = request.now_ms;
        let mut windows = self.windows.lock();

        if now - windows.last_cleanup_ms >= self.cleanup_interval_ms {
            let removed = windows.cleanup(now);
            if removed > 0 {
                debug!(removed, "Cleaned up idle local rate windows");
            }
        }

        let (mut p_count, mut p_oldest) = windows.tally(&request.primary, now);
        let (mut s_count, mut s_oldest) = windows.tally(&request.secondary, now);

        let p_allowed = p_count < request.primary.limit;
        let s_allowed = !p_allowed || s_count < request.secondary.limit;

        if p_allowed && s_allowed {
            p_oldest = windows.record(&request.primary, now);
            s_oldest = windows.record(&request.secondary, now);
            p_count += 1;
            s_count += 1;
        }

        DualWindowOutcome {
            primary: WindowTally {
                count: p_count,
                allowed: p_allowed,
                oldest_ms: p_oldest,
            },
            secondary: WindowTally {
                count: s_count,
                allowed: s_allowed,
                oldest_ms: s_oldest,
            },
        }
    }

    pub fn clear(&self, keys: &[String]) {
        let mut windows = self.windows.lock();
        for key in keys {
            windows.entries.remove(key);
        }
    }

    /// 当前跟踪的键数量
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().entries.len()
    }
}
