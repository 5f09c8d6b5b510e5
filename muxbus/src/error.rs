//! 服务端错误
//!
//! 帧级错误（错节点、校验失败、子帧畸形等）不在此列：它们只计数、
//! 丢帧、重新同步，不打断事件循环。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// 隧道数已达 max_tunnel_streams
    #[error("tunnel streams exhausted")]
    Exhausted,
    /// 通道号已有隧道
    #[error("channel {0} already has a tunnel")]
    DuplicateChannel(u32),
    /// 服务端事件循环已停止
    #[error("server stopped")]
    Stopped,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
