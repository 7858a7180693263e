//! 缓存与限流指标
//!
//! 未安装 recorder 时全部为空操作

use metrics::counter;

// ============================================================================
// 缓存 Metrics
// ============================================================================

/// 记录一次逻辑查找（每次 Get 只计一次）
pub fn record_cache_lookup(namespace: &str, tier: &str, hit: bool) {
    let labels = [
        ("namespace", namespace.to_string()),
        ("tier", tier.to_string()),
        ("result", if hit { "hit" } else { "miss" }.to_string()),
    ];
    counter!("lumen_cache_lookups_total", &labels).increment(1);
}

/// 记录远程存储错误
pub fn record_remote_error(component: &str, op: &str, kind: &str) {
    let labels = [
        ("component", component.to_string()),
        ("op", op.to_string()),
        ("kind", kind.to_string()),
    ];
    counter!("lumen_cache_remote_errors_total", &labels).increment(1);
}

/// 记录熔断状态切换
pub fn record_circuit_transition(component: &str, open: bool) {
    let labels = [
        ("component", component.to_string()),
        ("state", if open { "open" } else { "closed" }.to_string()),
    ];
    counter!("lumen_circuit_transitions_total", &labels).increment(1);
}

// ============================================================================
// Single-flight Metrics
// ============================================================================

pub fn record_single_flight(leader: bool) {
    let labels = [("role", if leader { "leader" } else { "follower" }.to_string())];
    counter!("lumen_single_flight_total", &labels).increment(1);
}

// ============================================================================
// 限流 Metrics
// ============================================================================

/// 记录限流判定，`window` 为触发拒绝的窗口，放行时为 "none"
pub fn record_rate_limit_decision(endpoint: &str, window: &str, allowed: bool) {
    let labels = [
        ("endpoint", endpoint.to_string()),
        ("window", window.to_string()),
        ("allowed", allowed.to_string()),
    ];
    counter!("lumen_rate_limit_decisions_total", &labels).increment(1);
}
