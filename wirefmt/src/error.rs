//! 编解码错误

use thiserror::Error;

/// 解码错误
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// 输入不足
    #[error("truncated input")]
    Truncated,
    /// varuint 第 5 字节仍有续位，或超出 u32 范围
    #[error("malformed varuint")]
    Malformed,
}
