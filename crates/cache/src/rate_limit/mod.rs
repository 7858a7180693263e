//! 双窗口滑动限流
//!
//! 每个 (client, endpoint) 同时受每分钟和每小时两个窗口约束。
//! 先判定分钟窗口，拒绝时小时窗口只统计不判定；两个窗口都放行才记录本次请求，
//! 被拒绝的请求不消耗配额。

mod decision;
mod limiter;
mod local;
mod policy;

pub use decision::{ClientKey, RateDecision, RateWindow};
pub use limiter::SlidingWindowLimiter;
pub use local::LocalWindowStore;
pub use policy::{EndpointLimit, RateLimitPolicy};
