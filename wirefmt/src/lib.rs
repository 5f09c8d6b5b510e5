//! wirefmt - 字节编码基础件
//!
//! 日志文件格式与总线协议共用的编码工具：
//! - 小端整数与 IEEE-754 f32 读写
//! - varuint：base-128 小端变长无符号整数（最长 5 字节，覆盖 u32）
//! - CRC-16/CCITT-FALSE 查表校验
//! - 可增长字节缓冲与缓冲池（数据路径零分配）
//!
//! 所有多字节量一律小端，与格式约定一致，任何地方不做字节序转换。

pub mod buffer;
pub mod crc16;
pub mod error;
pub mod reader;
pub mod varuint;

pub use buffer::{BufferPool, OwnedBuffer};
pub use crc16::{crc16, Crc16};
pub use error::CodecError;
pub use reader::ByteReader;
pub use varuint::{encoded_len, read_varuint, write_varuint};
