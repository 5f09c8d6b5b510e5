//! 文件写入器
//!
//! 块按调用顺序落盘；标识符与名字的绑定在内存维护，关闭时把
//! 每个标识符的 schema 偏移与最末记录偏移汇总为索引块写到文件尾。
//! 析构等价于显式 close，调用方忘记收尾也能得到完整文件。

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;
use wirefmt::{varuint, BufferPool, OwnedBuffer};

use crate::error::{Result, WriteError};
use crate::format::{
    BlockType, FILE_HEADER, FLAG_CHECKSUM, FLAG_PREVIOUS_OFFSET, FLAG_SNAPPY, FLAG_TIMESTAMP,
    FOOTER_SIZE, INDEX_MAGIC, MAX_IDENTIFIER, NO_RECORD,
};

/// 记录系列标识符，取值 [1, 2^31)
pub type Identifier = u32;

/// 写入选项
#[derive(Debug, Clone)]
pub struct Options {
    /// 超过阈值的负载自动 snappy 压缩
    pub default_compression: bool,
    /// 为每个数据块附带负载 CRC-32
    pub write_checksums: bool,
    /// 压缩启用的最小负载字节数
    pub compression_threshold: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_compression: true,
            write_checksums: false,
            compression_threshold: 64,
        }
    }
}

#[derive(Debug)]
struct RecordState {
    name: String,
    schema_offset: Option<u64>,
    final_record_offset: Option<u64>,
}

pub struct FileWriter {
    options: Options,
    file: Option<BufWriter<std::fs::File>>,
    /// 下一块的绝对写入偏移
    position: u64,
    /// 按标识符排序，关闭时直接顺序落索引
    records: BTreeMap<Identifier, RecordState>,
    names: HashMap<String, Identifier>,
    next_auto_id: Identifier,
    pool: BufferPool,
}

impl FileWriter {
    pub fn new(options: Options) -> Self {
        Self::with_pool(BufferPool::new(4, 4096), options)
    }

    /// 使用外部缓冲池构造
    pub fn with_pool(pool: BufferPool, options: Options) -> Self {
        Self {
            options,
            file: None,
            position: 0,
            records: BTreeMap::new(),
            names: HashMap::new(),
            next_auto_id: 1,
            pool,
        }
    }

    /// 构造并立即打开
    pub fn open_path<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let mut writer = Self::new(options);
        writer.open(path)?;
        Ok(writer)
    }

    /// 打开（截断）目标文件并立即写出 9 字节文件头
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.file.is_some() {
            return Err(WriteError::AlreadyOpen);
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(FILE_HEADER)?;
        self.position = FILE_HEADER.len() as u64;
        self.file = Some(writer);
        debug!(path = %path.as_ref().display(), "tlog opened");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// 取名字对应的标识符；新名字分配最小的未占用标识符。
    /// 纯分配，不产生文件写入，未打开时也可调用。
    pub fn allocate_identifier(&mut self, name: &str) -> Identifier {
        if let Some(&id) = self.names.get(name) {
            return id;
        }
        while self.records.contains_key(&self.next_auto_id) {
            self.next_auto_id += 1;
        }
        let id = self.next_auto_id;
        self.next_auto_id += 1;
        self.bind(name, id);
        id
    }

    /// 把名字绑定到指定标识符；标识符非法或任一方已被占用则
    /// 返回 false 且无副作用
    pub fn reserve_identifier(&mut self, name: &str, id: Identifier) -> bool {
        if id == 0 || id > MAX_IDENTIFIER {
            return false;
        }
        if self.records.contains_key(&id) || self.names.contains_key(name) {
            return false;
        }
        self.bind(name, id);
        true
    }

    fn bind(&mut self, name: &str, id: Identifier) {
        self.names.insert(name.to_string(), id);
        self.records.insert(
            id,
            RecordState {
                name: name.to_string(),
                schema_offset: None,
                final_record_offset: None,
            },
        );
    }

    /// 写出标识符的 schema 块，每个标识符至多一次
    pub fn write_schema(&mut self, id: Identifier, schema: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let name = match self.records.get(&id) {
            None => return Err(WriteError::UnknownIdentifier(id)),
            Some(state) if state.schema_offset.is_some() => {
                return Err(WriteError::SchemaAlreadyWritten(id));
            }
            Some(state) => state.name.clone(),
        };
        let offset = self.position;

        let mut body = self.pool.acquire();
        body.write_varuint(id);
        body.write_u8(0); // flags
        body.write_varuint(name.len() as u32);
        body.write(name.as_bytes());
        body.write(schema);
        let result = self.emit_block(BlockType::Schema, body.as_slice());
        self.pool.release(body);
        result?;

        if let Some(state) = self.records.get_mut(&id) {
            state.schema_offset = Some(offset);
        }
        Ok(())
    }

    /// 写出一条数据记录并更新该标识符的最末记录偏移
    pub fn write_data(&mut self, timestamp_us: i64, id: Identifier, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let previous = match self.records.get(&id) {
            None => return Err(WriteError::UnknownIdentifier(id)),
            Some(state) if state.schema_offset.is_none() => {
                return Err(WriteError::SchemaNotWritten(id));
            }
            Some(state) => state.final_record_offset,
        };
        let offset = self.position;

        let compressed = self.maybe_compress(payload)?;
        let (stored, snappy) = match &compressed {
            Some(data) => (data.as_slice(), true),
            None => (payload, false),
        };

        let mut flags = FLAG_PREVIOUS_OFFSET | FLAG_TIMESTAMP;
        if snappy {
            flags |= FLAG_SNAPPY;
        }
        if self.options.write_checksums {
            flags |= FLAG_CHECKSUM;
        }

        // 前向偏移是到上一条记录块首的字节差，varuint 容不下时退化为 0
        let delta = previous
            .map(|p| offset - p)
            .filter(|d| *d <= u32::MAX as u64)
            .unwrap_or(0) as u32;

        let mut body = self.pool.acquire();
        body.write_varuint(id);
        body.write_u8(flags);
        body.write_varuint(delta);
        body.write_i64(timestamp_us);
        if flags & FLAG_CHECKSUM != 0 {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(stored);
            body.write_u32(hasher.finalize());
        }
        body.write(stored);
        let result = self.emit_block(BlockType::Data, body.as_slice());
        self.pool.release(body);
        result?;

        if let Some(state) = self.records.get_mut(&id) {
            state.final_record_offset = Some(offset);
        }
        Ok(())
    }

    fn maybe_compress(&self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.options.default_compression || payload.len() <= self.options.compression_threshold
        {
            return Ok(None);
        }
        let mut out = Vec::with_capacity(payload.len() / 2);
        {
            let mut encoder = snap::write::FrameEncoder::new(&mut out);
            encoder.write_all(payload)?;
            encoder.flush()?;
        }
        // 压不小就按原样落盘
        if out.len() < payload.len() {
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }

    /// 从写入器缓冲池取一块草稿缓冲，配合 write_block 使用
    pub fn get_buffer(&mut self) -> OwnedBuffer {
        self.pool.acquire()
    }

    /// 把调用方预先序列化好的缓冲作为指定类型的块写出。
    /// 缓冲归还缓冲池；不更新任何标识符的最末记录偏移。
    pub fn write_block(&mut self, block_type: BlockType, buffer: OwnedBuffer) -> Result<()> {
        let result = if self.file.is_none() {
            Err(WriteError::NotOpen)
        } else {
            self.emit_block(block_type, buffer.as_slice())
        };
        self.pool.release(buffer);
        result
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.file.as_mut() {
            if let Err(e) = writer.flush() {
                self.poison();
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// 写出索引块与尾部并关闭；对已关闭的写入器是空操作
    pub fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let index = self.build_index();
        let result = self.emit_block(BlockType::Index, index.as_slice());
        self.pool.release(index);
        result?;
        if let Some(mut writer) = self.file.take() {
            writer.flush()?;
        }
        debug!(records = self.records.len(), "tlog closed");
        Ok(())
    }

    /// 索引块 body：flags + nelements + 各表项 + total(u32) + 魔数。
    /// total 覆盖索引块从类型字节到魔数的全部字节，读取方按它
    /// 从文件尾回退定位块首。
    fn build_index(&mut self) -> OwnedBuffer {
        let nelements = self.records.len() as u32;
        let mut body_len = 1 + varuint::encoded_len(nelements) + FOOTER_SIZE;
        for &id in self.records.keys() {
            body_len += varuint::encoded_len(id) + 16;
        }
        let total = (1 + varuint::encoded_len(body_len as u32) + body_len) as u32;

        let mut body = self.pool.acquire();
        body.write_u8(0); // flags
        body.write_varuint(nelements);
        for (&id, state) in &self.records {
            body.write_varuint(id);
            body.write_u64(state.schema_offset.unwrap_or(0));
            body.write_u64(state.final_record_offset.unwrap_or(NO_RECORD));
        }
        body.write_u32(total);
        body.write(INDEX_MAGIC);
        body
    }

    fn emit_block(&mut self, block_type: BlockType, body: &[u8]) -> Result<()> {
        let writer = match self.file.as_mut() {
            Some(writer) => writer,
            None => return Err(WriteError::NotOpen),
        };
        let (size_buf, size_len) = varuint::encode(body.len() as u32);
        let result = (|| -> std::io::Result<()> {
            writer.write_all(&[block_type as u8])?;
            writer.write_all(&size_buf[..size_len])?;
            writer.write_all(body)
        })();
        match result {
            Ok(()) => {
                self.position += 1 + size_len as u64 + body.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.poison();
                Err(e.into())
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.file.is_some() {
            Ok(())
        } else {
            Err(WriteError::NotOpen)
        }
    }

    /// IO 出错后丢弃文件句柄，后续调用一律 NotOpen，收尾索引不再写出
    fn poison(&mut self) {
        self.file = None;
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
