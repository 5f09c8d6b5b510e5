//! 协议常量与基本类型

use bytes::{BufMut, BytesMut};
use wirefmt::{varuint, ByteReader, CodecError, Crc16};

/// 帧魔数（线上先低字节 0x54 后高字节 0xAB）
pub const FRAME_MAGIC: u16 = 0xAB54;
pub const MAGIC_LO: u8 = 0x54;
pub const MAGIC_HI: u8 = 0xAB;

/// source 最高位：请求响应
pub const RESPONSE_BIT: u8 = 0x80;
/// 节点号掩码（7 位）
pub const ID_MASK: u8 = 0x7F;

pub const CRC_SIZE: usize = 2;

/// 子帧类型
///
/// 寄存器操作各占 4 个连续编号，BASE + 类型序号即具体操作码。
pub mod subframe {
    pub const WRITE_SINGLE_BASE: u8 = 0x10;
    pub const WRITE_SINGLE_LAST: u8 = 0x13;
    pub const WRITE_MULTIPLE_BASE: u8 = 0x14;
    pub const WRITE_MULTIPLE_LAST: u8 = 0x17;
    pub const READ_SINGLE_BASE: u8 = 0x18;
    pub const READ_SINGLE_LAST: u8 = 0x1B;
    pub const READ_MULTIPLE_BASE: u8 = 0x1C;
    pub const READ_MULTIPLE_LAST: u8 = 0x1F;
    pub const REPLY_SINGLE_BASE: u8 = 0x20;
    pub const WRITE_ERROR: u8 = 0x28;
    pub const READ_ERROR: u8 = 0x29;
    pub const CLIENT_TO_SERVER: u8 = 0x40;
    pub const SERVER_TO_CLIENT: u8 = 0x41;
}

/// 应用定义的寄存器号
pub type Register = u32;

/// 寄存器值：带类型标签的标量。
/// 声明顺序即线上 2 位类型序号 {i8=0, i16=1, i32=2, f32=3}。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    F32(f32),
}

impl Value {
    pub fn type_index(&self) -> usize {
        match self {
            Value::I8(_) => 0,
            Value::I16(_) => 1,
            Value::I32(_) => 2,
            Value::F32(_) => 3,
        }
    }

    /// 线上字节数
    pub fn size(&self) -> usize {
        match self {
            Value::I8(_) => 1,
            Value::I16(_) => 2,
            Value::I32(_) => 4,
            Value::F32(_) => 4,
        }
    }

    pub fn write_to<B: BufMut>(&self, out: &mut B) {
        match *self {
            Value::I8(v) => out.put_i8(v),
            Value::I16(v) => out.put_i16_le(v),
            Value::I32(v) => out.put_i32_le(v),
            Value::F32(v) => out.put_f32_le(v),
        }
    }

    pub fn read_from(reader: &mut ByteReader<'_>, type_index: usize) -> Result<Self, CodecError> {
        Ok(match type_index & 0x03 {
            0 => Value::I8(reader.read_i8()?),
            1 => Value::I16(reader.read_i16()?),
            2 => Value::I32(reader.read_i32()?),
            _ => Value::F32(reader.read_f32()?),
        })
    }
}

/// 读结果：值或应用错误码（0 表示成功，非 0 进 0x29 子帧）
pub type ReadResult = Result<Value, u32>;

/// 应用侧寄存器服务能力。
///
/// 一帧内的全部子帧在返回事件循环前同步执行完毕，实现方可以
/// 据此做整帧原子更新。事件循环通常跑在独立任务上，实现需要 Send。
pub trait RegisterHandler: Send {
    /// 存储寄存器值，返回错误码，0 为成功
    fn write(&mut self, register: Register, value: Value) -> u32;

    /// 按类型序号读取寄存器值
    fn read(&self, register: Register, type_index: usize) -> ReadResult;
}

/// 组装整帧（含 CRC）到给定缓冲尾部
pub fn encode_frame_into(out: &mut BytesMut, source: u8, dest: u8, payload: &[u8]) {
    let start = out.len();
    out.put_u8(MAGIC_LO);
    out.put_u8(MAGIC_HI);
    out.put_u8(source);
    out.put_u8(dest);
    varuint::write_varuint(out, payload.len() as u32);
    out.extend_from_slice(payload);

    // CRC 按 CRC 字段填零的整帧计算
    let mut crc = Crc16::new();
    crc.update(&out[start..]);
    crc.update(&[0, 0]);
    out.put_u16_le(crc.finalize());
}

/// 组装整帧为独立 Vec（客户端/测试路径）
pub fn encode_frame(source: u8, dest: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(4 + 5 + payload.len() + CRC_SIZE);
    encode_frame_into(&mut out, source, dest, payload);
    out.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirefmt::crc16;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(0x81, 0x02, &[0x18, 0x00]);
        assert_eq!(&frame[..2], &[MAGIC_LO, MAGIC_HI]);
        assert_eq!(frame[2], 0x81);
        assert_eq!(frame[3], 0x02);
        assert_eq!(frame[4], 2); // payload size
        assert_eq!(&frame[5..7], &[0x18, 0x00]);

        // CRC 自校验
        let mut crc = Crc16::new();
        crc.update(&frame[..frame.len() - 2]);
        crc.update(&[0, 0]);
        let expected = crc.finalize();
        assert_eq!(
            u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]),
            expected
        );
    }

    #[test]
    fn test_magic_word_matches_wire_bytes() {
        assert_eq!(FRAME_MAGIC.to_le_bytes(), [MAGIC_LO, MAGIC_HI]);
    }

    #[test]
    fn test_value_wire_encoding() {
        let mut out = BytesMut::new();
        Value::I8(-7).write_to(&mut out);
        Value::I16(-2).write_to(&mut out);
        Value::I32(0x01020304).write_to(&mut out);
        Value::F32(1.0).write_to(&mut out);
        assert_eq!(
            &out[..],
            [
                0xF9, // i8 -7
                0xFE, 0xFF, // i16 -2
                0x04, 0x03, 0x02, 0x01, // i32
                0x00, 0x00, 0x80, 0x3F, // f32 1.0
            ]
        );

        let mut reader = ByteReader::new(&out);
        assert_eq!(Value::read_from(&mut reader, 0).unwrap(), Value::I8(-7));
        assert_eq!(Value::read_from(&mut reader, 1).unwrap(), Value::I16(-2));
        assert_eq!(
            Value::read_from(&mut reader, 2).unwrap(),
            Value::I32(0x01020304)
        );
        assert_eq!(Value::read_from(&mut reader, 3).unwrap(), Value::F32(1.0));
    }

    #[test]
    fn test_type_index_order() {
        assert_eq!(Value::I8(0).type_index(), 0);
        assert_eq!(Value::I16(0).type_index(), 1);
        assert_eq!(Value::I32(0).type_index(), 2);
        assert_eq!(Value::F32(0.0).type_index(), 3);
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = encode_frame(0x05, 0x01, &[]);
        assert_eq!(frame.len(), 7); // magic(2) + src + dst + size(1) + crc(2)
        assert_eq!(frame[4], 0);
        let _ = crc16(&frame);
    }
}
