//! lumen-cache - 缓存、单飞与限流核心
//!
//! - [`CacheCoordinator`]：远程缓存 + 本地 [`TimedEntryStore`] 双层，远程故障时透明降级
//! - [`SingleFlight`]：同一指纹并发请求只执行一次计算
//! - [`SlidingWindowLimiter`]：分钟/小时双窗口滑动限流
//! - [`ComputationOrchestrator`]：get-or-compute 组合入口
//! - [`CacheRuntime`]：从配置组装以上组件

mod circuit;
mod clock;
mod coordinator;
mod error;
mod fingerprint;
pub mod metrics;
mod namespace;
mod orchestrator;
pub mod rate_limit;
mod runtime;
mod single_flight;
mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use circuit::{CircuitBreaker, CircuitSnapshot};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use coordinator::{CacheCoordinator, CacheStats, Tier, validate_namespace};
pub use lumen_ports::MAX_TTL;
pub use error::FlightError;
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use namespace::{NamespacePolicy, NamespaceTable};
pub use orchestrator::{ComputationOrchestrator, SourceTag};
pub use rate_limit::{ClientKey, EndpointLimit, RateDecision, RateLimitPolicy, SlidingWindowLimiter};
pub use runtime::CacheRuntime;
pub use single_flight::SingleFlight;
pub use store::TimedEntryStore;
