//! varuint 编解码
//!
//! base-128 小端变长无符号整数：每字节低 7 位为数据，最高位为续位标记。
//! 最多表示一个 u32，因此合法长度为 1..=5 字节。
//!
//! ```text
//! 0x00000005 -> 05
//! 0x00000080 -> 80 01
//! 0xFFFFFFFF -> FF FF FF FF 0F
//! ```

use bytes::BufMut;

use crate::error::CodecError;

/// 编码后长度 (1..=5)
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// 编码到任意 BufMut 尾部，返回写入字节数
pub fn write_varuint<B: BufMut>(out: &mut B, mut value: u32) -> usize {
    let mut written = 0;
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        written += 1;
        if value == 0 {
            return written;
        }
    }
}

/// 编码到栈上定长数组，返回 (数组, 有效长度)。
/// 供不便引入 BufMut 的写路径（如块头组装）使用。
pub fn encode(value: u32) -> ([u8; 5], usize) {
    let mut buf = [0u8; 5];
    let mut slice = &mut buf[..];
    let len = write_varuint(&mut slice, value);
    (buf, len)
}

/// 从切片头部解码，返回 (值, 消耗字节数)
pub fn read_varuint(data: &[u8]) -> Result<(u32, usize), CodecError> {
    let mut value: u32 = 0;
    for (i, &byte) in data.iter().enumerate().take(5) {
        let bits = (byte & 0x7F) as u32;
        if i == 4 && (byte & 0x80 != 0 || bits > 0x0F) {
            return Err(CodecError::Malformed);
        }
        value |= bits << (7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CodecError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let n = write_varuint(&mut out, value);
        assert_eq!(n, out.len());
        assert_eq!(n, encoded_len(value));
        let (decoded, consumed) = read_varuint(&out).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, n);
        out
    }

    #[test]
    fn test_boundary_values() {
        assert_eq!(roundtrip(0), [0x00]);
        assert_eq!(roundtrip(0x7F), [0x7F]);
        assert_eq!(roundtrip(0x80), [0x80, 0x01]);
        assert_eq!(roundtrip(0x3FFF), [0xFF, 0x7F]);
        assert_eq!(roundtrip(0x4000), [0x80, 0x80, 0x01]);
        assert_eq!(roundtrip(u32::MAX), [0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(read_varuint(&[]), Err(CodecError::Truncated));
        assert_eq!(read_varuint(&[0x80]), Err(CodecError::Truncated));
        assert_eq!(
            read_varuint(&[0x80, 0x80, 0x80, 0x80]),
            Err(CodecError::Truncated)
        );
    }

    #[test]
    fn test_malformed_fifth_byte() {
        // 第 5 字节仍带续位
        assert_eq!(
            read_varuint(&[0x80, 0x80, 0x80, 0x80, 0x80]),
            Err(CodecError::Malformed)
        );
        // 第 5 字节超出 u32 可容纳的 4 位
        assert_eq!(
            read_varuint(&[0xFF, 0xFF, 0xFF, 0xFF, 0x10]),
            Err(CodecError::Malformed)
        );
    }

    #[test]
    fn test_encode_array() {
        let (buf, len) = encode(0x12345678);
        let (value, consumed) = read_varuint(&buf[..len]).unwrap();
        assert_eq!(value, 0x12345678);
        assert_eq!(consumed, len);
    }
}
