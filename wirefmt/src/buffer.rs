//! 可增长缓冲与缓冲池
//!
//! `OwnedBuffer` 是一块独占的可增长字节缓冲，提供小端标量与 varuint
//! 的追加写入。`BufferPool` 在构造时预分配一批缓冲，使用方 acquire
//! 后独占填写，release 归还复用，稳态数据路径不再分配。

use bytes::{BufMut, BytesMut};

use crate::varuint;

/// 独占字节缓冲
#[derive(Debug)]
pub struct OwnedBuffer {
    data: BytesMut,
}

impl OwnedBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.put_u64_le(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.data.put_i16_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.put_i64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.data.put_f32_le(value);
    }

    /// 追加一个 varuint，返回写入字节数
    pub fn write_varuint(&mut self, value: u32) -> usize {
        varuint::write_varuint(&mut self.data, value)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn into_inner(self) -> BytesMut {
        self.data
    }
}

/// 预分配缓冲池
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<BytesMut>,
    buffer_size: usize,
}

impl BufferPool {
    /// 预分配 count 块容量为 buffer_size 的缓冲
    pub fn new(count: usize, buffer_size: usize) -> Self {
        Self {
            free: (0..count)
                .map(|_| BytesMut::with_capacity(buffer_size))
                .collect(),
            buffer_size,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 当前空闲缓冲数
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// 取出一块缓冲；池空时退化为新分配
    pub fn acquire(&mut self) -> OwnedBuffer {
        OwnedBuffer {
            data: self.acquire_raw(),
        }
    }

    /// 归还缓冲（内容清空后复用）
    pub fn release(&mut self, buffer: OwnedBuffer) {
        self.release_raw(buffer.into_inner());
    }

    /// 取出底层 BytesMut，供需要直接操作字节队列的使用方
    pub fn acquire_raw(&mut self) -> BytesMut {
        self.free
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size))
    }

    pub fn release_raw(&mut self, mut data: BytesMut) {
        data.clear();
        self.free.push(data);
    }
}
