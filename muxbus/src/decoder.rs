//! 帧接收状态机
//!
//! 逐字节驱动：Hunt 状态扫描魔数低字节，此后依次累积魔数高字节、
//! 源/目的节点、varuint 载荷长度、载荷与 16 位 CRC。任何失配都
//! 回到 Hunt 重新同步。分块喂入就是逐字节循环，喂入方式不影响
//! 产出的帧、计数与响应。

use bytes::BytesMut;

use crate::protocol::{MAGIC_HI, MAGIC_LO};
use wirefmt::Crc16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Hunt,
    MagicHi,
    Source,
    Dest,
    Size,
    Payload,
    CrcLo,
    CrcHi,
}

/// 解码产出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeEvent {
    /// 一帧校验通过；载荷经 `payload()` 读取，有效期到下一次 feed
    Frame { source: u8, dest: u8 },
    ChecksumMismatch,
    /// 载荷长度超出缓冲上限
    Overrun,
    /// 载荷长度 varuint 非法
    Malformed,
}

pub(crate) struct FrameDecoder {
    state: State,
    crc: Crc16,
    source: u8,
    dest: u8,
    size: u32,
    size_shift: u32,
    size_bytes: usize,
    remaining: usize,
    payload: BytesMut,
    max_payload: usize,
    crc_lo: u8,
}

impl FrameDecoder {
    pub fn new(max_payload: usize, payload_buf: BytesMut) -> Self {
        Self {
            state: State::Hunt,
            crc: Crc16::new(),
            source: 0,
            dest: 0,
            size: 0,
            size_shift: 0,
            size_bytes: 0,
            remaining: 0,
            payload: payload_buf,
            max_payload,
            crc_lo: 0,
        }
    }

    /// 最近一帧的载荷
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn begin(&mut self) {
        self.crc = Crc16::new();
        self.crc.update(&[MAGIC_LO]);
        self.state = State::MagicHi;
    }

    pub fn feed(&mut self, byte: u8) -> Option<DecodeEvent> {
        match self.state {
            State::Hunt => {
                if byte == MAGIC_LO {
                    self.begin();
                }
                None
            }
            State::MagicHi => {
                if byte == MAGIC_HI {
                    self.crc.update(&[byte]);
                    self.state = State::Source;
                } else if byte == MAGIC_LO {
                    // 失配字节本身又是魔数低字节，留在同步点
                    self.begin();
                } else {
                    self.state = State::Hunt;
                }
                None
            }
            State::Source => {
                self.source = byte;
                self.crc.update(&[byte]);
                self.state = State::Dest;
                None
            }
            State::Dest => {
                self.dest = byte;
                self.crc.update(&[byte]);
                self.size = 0;
                self.size_shift = 0;
                self.size_bytes = 0;
                self.state = State::Size;
                None
            }
            State::Size => {
                self.crc.update(&[byte]);
                self.size_bytes += 1;
                let bits = (byte & 0x7F) as u32;
                if self.size_bytes == 5 && (byte & 0x80 != 0 || bits > 0x0F) {
                    self.state = State::Hunt;
                    return Some(DecodeEvent::Malformed);
                }
                self.size |= bits << self.size_shift;
                self.size_shift += 7;
                if byte & 0x80 != 0 {
                    return None;
                }
                if self.size as usize > self.max_payload {
                    self.state = State::Hunt;
                    return Some(DecodeEvent::Overrun);
                }
                self.payload.clear();
                if self.size == 0 {
                    self.state = State::CrcLo;
                } else {
                    self.remaining = self.size as usize;
                    self.state = State::Payload;
                }
                None
            }
            State::Payload => {
                self.crc.update(&[byte]);
                self.payload.extend_from_slice(&[byte]);
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.state = State::CrcLo;
                }
                None
            }
            State::CrcLo => {
                self.crc_lo = byte;
                self.state = State::CrcHi;
                None
            }
            State::CrcHi => {
                self.state = State::Hunt;
                let received = u16::from_le_bytes([self.crc_lo, byte]);
                let mut crc = self.crc.clone();
                crc.update(&[0, 0]);
                if crc.finalize() == received {
                    Some(DecodeEvent::Frame {
                        source: self.source,
                        dest: self.dest,
                    })
                } else {
                    Some(DecodeEvent::ChecksumMismatch)
                }
            }
        }
    }
}
