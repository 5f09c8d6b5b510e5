//! TLOG v3 格式常量
//!
//! 所有多字节量小端。时间戳为 1970-01-01 UTC 起的微秒数 (i64)。

/// 文件头: ASCII "TLOG0003" + 1 个零字节
pub const FILE_HEADER: &[u8; 9] = b"TLOG0003\0";

/// 索引尾部魔数
pub const INDEX_MAGIC: &[u8; 8] = b"TLOGIDEX";

/// 尾部定长部分: total(u32) + 魔数
pub const FOOTER_SIZE: usize = 12;

/// 标识符合法上界（开区间）；0 保留
pub const MAX_IDENTIFIER: u32 = (1 << 31) - 1;

/// 索引中"无数据记录"的占位偏移
pub const NO_RECORD: u64 = u64::MAX;

/// 块类型
///
/// CompressionDictionary 与 SeekMarker 为保留类型，本写入器不产出。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Schema = 0x01,
    Data = 0x02,
    Index = 0x03,
    CompressionDictionary = 0x04,
    SeekMarker = 0x05,
}

/// 数据块 flags 位
///
/// ```text
/// bit 0: 前向偏移存在（varuint，距上一条同标识符记录的字节差，无则 0）
/// bit 1: 时间戳存在（i64 微秒）
/// bit 2: 负载 CRC-32 存在（u32，按落盘字节计算）
/// bit 3: 负载为 snappy 帧压缩
/// ```
pub const FLAG_PREVIOUS_OFFSET: u8 = 0x01;
pub const FLAG_TIMESTAMP: u8 = 0x02;
pub const FLAG_CHECKSUM: u8 = 0x04;
pub const FLAG_SNAPPY: u8 = 0x08;

/// SystemTime 转格式时间戳（微秒）
pub fn unix_micros(t: std::time::SystemTime) -> i64 {
    match t.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_micros() as i64,
        Err(e) => -(e.duration().as_micros() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_timestamp_vector() {
        // 2020-03-10 00:00:00 UTC
        let t = UNIX_EPOCH + Duration::from_secs(1_583_798_400);
        let us = unix_micros(t);
        assert_eq!(us, 1_583_798_400_000_000);
        assert_eq!(
            us.to_le_bytes(),
            [0x00, 0x20, 0x07, 0xCD, 0x74, 0xA0, 0x05, 0x00]
        );
    }
}
