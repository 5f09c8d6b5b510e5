//! 写入器错误
//!
//! 用法错误属调用方缺陷，同步报错；IO 错误使写入器失效，
//! 之后的调用一律 NotOpen，收尾索引不再尝试写出。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("writer is not open")]
    NotOpen,
    #[error("writer is already open")]
    AlreadyOpen,
    #[error("unknown identifier {0}")]
    UnknownIdentifier(u32),
    #[error("schema already written for identifier {0}")]
    SchemaAlreadyWritten(u32),
    #[error("schema not written for identifier {0}")]
    SchemaNotWritten(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WriteError>;
