//! ports - 抽象 trait 层
//!
//! 定义远程共享存储的边界接口：键值缓存与滑动窗口计数

mod cache;
mod rate_window;

pub use cache::*;
pub use rate_window::*;
