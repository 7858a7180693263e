//! Redis 错误分类

use lumen_errors::RemoteError;
use redis::{ErrorKind, RedisError};

/// 将 RedisError 映射为远程错误类别
///
/// 超时、连接类错误可降级；类型转换和客户端配置错误属于调用方缺陷；
/// 其余服务端返回的错误归为协议错误。
pub fn classify_redis_error(op: &str, err: &RedisError) -> RemoteError {
    let message = format!("redis {} failed: {}", op, err);

    if err.is_timeout() {
        return RemoteError::timeout(message);
    }
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        return RemoteError::connection(message);
    }
    match err.kind() {
        ErrorKind::TypeError | ErrorKind::InvalidClientConfig | ErrorKind::ClientError => {
            RemoteError::misuse(message)
        }
        _ => RemoteError::protocol(message),
    }
}
