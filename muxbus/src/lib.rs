//! muxbus - 多路复用总线协议服务端
//!
//! 运行于半双工/全双工串行链路之上的帧协议，单客户端对多服务端，
//! 同一链路承载两种服务：
//! 1. 寄存器 RPC：按 32 位寄存器号读写 {i8, i16, i32, f32} 标量
//! 2. 隧道流：按 32 位通道号复用的轮询式双向字节流
//!
//! 帧格式（全部小端，varuint 为 base-128 变长）：
//! ```text
//! ┌────────┬────────┬──────┬─────────┬─────────┬───────┐
//! │ magic  │ source │ dest │ size    │ payload │ crc16 │
//! │ 0xAB54 │ 1B     │ 1B   │ varuint │ N bytes │ 2B    │
//! └────────┴────────┴──────┴─────────┴─────────┴───────┘
//! ```
//! - source 最高位置位表示请求响应；节点号为低 7 位
//! - CRC 为 CCITT-FALSE，按 CRC 字段填零的整帧计算
//!
//! 载荷由子帧顺序排列，子帧为 varuint 类型 + 类型相关数据：
//! ```text
//! 0x10-0x13  写单个 (i8|i16|i32|f32): reg + value
//! 0x14-0x17  写多个: start + count + count×value
//! 0x18-0x1B  读单个: reg
//! 0x1C-0x1F  读多个: start + count
//! 0x20-0x23  读响应单个: reg + value
//! 0x24-0x27  读响应多个: start + count + count×value
//! 0x28/0x29  写/读错误: reg + errcode
//! 0x40/0x41  隧道 客户端→服务端 / 服务端→客户端: channel + n + n 字节
//! ```
//! 携带隧道子帧的帧只含这一个子帧；读请求的每个寄存器在响应中
//! 恰好出现一次。服务端从不主动发起隧道报文，一切由客户端轮询驱动。

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tunnel;

mod decoder;

pub use config::{ConfigStore, MemStore, NODE_ID_KEY};
pub use error::ServerError;
pub use protocol::{ReadResult, Register, RegisterHandler, Value};
pub use server::{MuxServer, RawWriter, ServerOptions, Stats};
pub use tunnel::Tunnel;
