//! tlog - TLOG v3 遥测日志写入器
//!
//! 产出自描述、可寻址、只追加的二进制日志。记录按标识符分流，
//! 每个标识符先写一次 schema，之后的数据块携带时间戳与可选压缩
//! 负载；文件尾部的索引块支持不全量扫描的 O(log n) 定位。
//!
//! 文件结构：
//! ```text
//! ┌──────────────┬────────┬────────┬─────┬────────┬──────────────┐
//! │ "TLOG0003\0" │ Block1 │ Block2 │ ... │ Index  │ total+魔数   │
//! │ 9 字节       │        │        │     │        │ 12 字节      │
//! └──────────────┴────────┴────────┴─────┴────────┴──────────────┘
//! ```
//!
//! 块格式：
//! ```text
//! ┌────────┬──────────────┬─────────────┐
//! │ type   │ size         │ body        │
//! │ 1B     │ varuint      │ size 字节   │
//! └────────┴──────────────┴─────────────┘
//! ```
//!
//! 读取方取文件末尾 12 字节，校验 "TLOGIDEX" 魔数后按 total 回退
//! 即是索引块起点；索引给出每个标识符的 schema 偏移与最末记录偏移。

pub mod error;
pub mod format;
pub mod writer;


pub use error::WriteError;
pub use format::BlockType;
pub use writer::{FileWriter, Identifier, Options};
