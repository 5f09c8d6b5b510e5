//! 协议服务端
//!
//! 事件循环从流中取字节喂给帧状态机，整帧通过校验后在返回事件
//! 循环前完成全部子帧分发与响应组帧。帧级错误只计数、丢帧、
//! 重新同步；事件循环本身只在流关闭或 IO 出错时退出。

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use wirefmt::{varuint, BufferPool, ByteReader, CodecError};

use crate::config::{ConfigStore, NODE_ID_KEY};
use crate::decoder::{DecodeEvent, FrameDecoder};
use crate::error::ServerError;
use crate::protocol::{self, subframe, RegisterHandler, Value, ID_MASK, RESPONSE_BIT};
use crate::tunnel::{Tunnel, TunnelShared};

/// 服务端选项
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// 单帧载荷与响应载荷的字节上限，最小 256
    pub buffer_size: usize,
    /// 可同时存在的隧道数
    pub max_tunnel_streams: usize,
    /// 配置存储中无节点号时采用并回写的缺省值
    pub default_id: u8,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            max_tunnel_streams: 1,
            default_id: 1,
        }
    }
}

/// 帧级错误计数，全部为瞬态错误
#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats {
    pub wrong_id: u32,
    pub checksum_mismatch: u32,
    pub receive_overrun: u32,
    pub unknown_subframe: u32,
    pub missing_subframe: u32,
    pub malformed_subframe: u32,
}

/// 向总线主设备推送未组帧数据的句柄
#[derive(Clone)]
pub struct RawWriter {
    tx: mpsc::Sender<Bytes>,
}

impl RawWriter {
    pub async fn write(&self, data: &[u8]) -> Result<(), ServerError> {
        self.tx
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| ServerError::Stopped)
    }
}

pub struct MuxServer<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    id: u8,
    options: ServerOptions,
    decoder: FrameDecoder,
    /// 流读取草稿
    chunk: BytesMut,
    /// 响应帧组装
    tx: BytesMut,
    /// 响应载荷累积
    reply: BytesMut,
    tunnels: Vec<Arc<TunnelShared>>,
    /// 构造时从缓冲池预取的隧道环，make_tunnel 逐个消耗
    spare_rings: Vec<(BytesMut, BytesMut)>,
    stats: Stats,
    unknown_tx: Option<mpsc::Sender<Bytes>>,
    raw_tx: mpsc::Sender<Bytes>,
    raw_rx: mpsc::Receiver<Bytes>,
}

impl<S: AsyncRead + AsyncWrite> MuxServer<S> {
    /// 所有工作缓冲在此一次取齐，数据路径不再分配
    pub fn new(
        pool: &mut BufferPool,
        stream: S,
        store: &mut dyn ConfigStore,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        let mut options = options;
        options.buffer_size = options.buffer_size.max(256);

        let id = match store.load(NODE_ID_KEY)? {
            Some(bytes) if !bytes.is_empty() => bytes[0] & ID_MASK,
            _ => {
                let id = options.default_id & ID_MASK;
                store.store(NODE_ID_KEY, &[id])?;
                id
            }
        };

        let mut payload_buf = pool.acquire_raw();
        payload_buf.reserve(options.buffer_size);
        let mut tx = pool.acquire_raw();
        tx.reserve(options.buffer_size + 16);
        let mut reply = pool.acquire_raw();
        reply.reserve(options.buffer_size);
        let mut chunk = pool.acquire_raw();
        chunk.resize(options.buffer_size, 0);
        let spare_rings = (0..options.max_tunnel_streams)
            .map(|_| {
                let mut ingress = pool.acquire_raw();
                ingress.reserve(options.buffer_size);
                let mut egress = pool.acquire_raw();
                egress.reserve(options.buffer_size);
                (ingress, egress)
            })
            .collect();

        let (reader, writer) = tokio::io::split(stream);
        let (raw_tx, raw_rx) = mpsc::channel(4);
        debug!(id, buffer_size = options.buffer_size, "muxbus server ready");

        Ok(Self {
            reader,
            writer,
            id,
            decoder: FrameDecoder::new(options.buffer_size, payload_buf),
            options,
            chunk,
            tx,
            reply,
            tunnels: Vec::new(),
            spare_rings,
            stats: Stats::default(),
            unknown_tx: None,
            raw_tx,
            raw_rx,
        })
    }

    pub fn node_id(&self) -> u8 {
        self.id
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// 在指定通道上建一条隧道流
    pub fn make_tunnel(&mut self, channel: u32) -> Result<Tunnel, ServerError> {
        if self.tunnels.iter().any(|t| t.channel == channel) {
            return Err(ServerError::DuplicateChannel(channel));
        }
        let (ingress, egress) = self.spare_rings.pop().ok_or(ServerError::Exhausted)?;
        let shared = Arc::new(TunnelShared::new(
            channel,
            ingress,
            egress,
            self.options.buffer_size,
        ));
        self.tunnels.push(Arc::clone(&shared));
        Ok(Tunnel::new(shared))
    }

    /// 布防"错目的帧"观察口：发往其他节点的帧载荷从返回的通道递出。
    /// 未布防或通道已满时此类帧计入 wrong_id 后丢弃。
    pub fn take_unknown_receiver(&mut self) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(4);
        self.unknown_tx = Some(tx);
        rx
    }

    /// 取一个未组帧写句柄，数据在两帧之间写往总线主设备
    pub fn raw_write_handle(&self) -> RawWriter {
        RawWriter {
            tx: self.raw_tx.clone(),
        }
    }

    /// 事件循环。流正常关闭返回 Ok，IO 错误返回 Err。
    pub async fn run(&mut self, handler: &mut dyn RegisterHandler) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                result = self.reader.read(&mut self.chunk[..]) => {
                    let n = result?;
                    if n == 0 {
                        debug!("stream closed");
                        return Ok(());
                    }
                    for i in 0..n {
                        let byte = self.chunk[i];
                        if let Some(event) = self.decoder.feed(byte) {
                            self.handle_event(event, handler).await?;
                        }
                    }
                }
                maybe = self.raw_rx.recv() => {
                    if let Some(data) = maybe {
                        self.writer.write_all(&data).await?;
                    }
                }
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: DecodeEvent,
        handler: &mut dyn RegisterHandler,
    ) -> Result<(), ServerError> {
        match event {
            DecodeEvent::ChecksumMismatch => {
                self.stats.checksum_mismatch += 1;
                warn!("frame checksum mismatch");
            }
            DecodeEvent::Overrun => {
                self.stats.receive_overrun += 1;
                warn!("frame payload exceeds buffer");
            }
            DecodeEvent::Malformed => {
                self.stats.malformed_subframe += 1;
            }
            DecodeEvent::Frame { source, dest } => {
                self.process_frame(source, dest, handler).await?;
            }
        }
        Ok(())
    }

    async fn process_frame(
        &mut self,
        source: u8,
        dest: u8,
        handler: &mut dyn RegisterHandler,
    ) -> Result<(), ServerError> {
        if dest != self.id {
            // 发往其他节点：已布防则原样递送载荷，否则计数丢弃
            if let Some(tx) = &self.unknown_tx {
                if tx
                    .try_send(Bytes::copy_from_slice(self.decoder.payload()))
                    .is_ok()
                {
                    return Ok(());
                }
            }
            self.stats.wrong_id += 1;
            return Ok(());
        }

        let respond = source & RESPONSE_BIT != 0;
        trace!(
            source,
            dest,
            len = self.decoder.payload().len(),
            respond,
            "frame accepted"
        );

        self.reply.clear();
        let overflowed = dispatch_payload(
            self.decoder.payload(),
            respond,
            self.options.buffer_size,
            handler,
            &self.tunnels,
            &mut self.reply,
            &mut self.stats,
        );
        if overflowed {
            self.stats.receive_overrun += 1;
        }

        if respond {
            // 响应在下一请求被消费前完整发出
            self.tx.clear();
            protocol::encode_frame_into(&mut self.tx, self.id, source & ID_MASK, &self.reply);
            self.writer.write_all(&self.tx).await?;
        }
        Ok(())
    }
}

/// 子帧分发。返回响应是否发生截断。
///
/// 子帧按声明顺序执行；未知类型计数后跳过载荷剩余部分，截断的
/// 子帧计数后终止本帧分发。写副作用不受响应预算影响，放不下的
/// 响应子帧整个丢弃。
fn dispatch_payload(
    payload: &[u8],
    respond: bool,
    budget: usize,
    handler: &mut dyn RegisterHandler,
    tunnels: &[Arc<TunnelShared>],
    reply: &mut BytesMut,
    stats: &mut Stats,
) -> bool {
    let mut overflowed = false;
    if payload.is_empty() {
        stats.missing_subframe += 1;
        return false;
    }

    let mut reader = ByteReader::new(payload);
    while !reader.is_empty() {
        let ty = match reader.read_varuint() {
            Ok(value) => value,
            Err(_) => {
                stats.malformed_subframe += 1;
                break;
            }
        };
        // 已定义的子帧类型都落在单字节内
        let ty = match u8::try_from(ty) {
            Ok(t) => t,
            Err(_) => {
                stats.unknown_subframe += 1;
                break;
            }
        };
        match ty {
            // 写单个
            subframe::WRITE_SINGLE_BASE..=subframe::WRITE_SINGLE_LAST => {
                let type_index = (ty - subframe::WRITE_SINGLE_BASE) as usize;
                let parsed = (|| -> Result<(u32, Value), CodecError> {
                    let reg = reader.read_varuint()?;
                    Ok((reg, Value::read_from(&mut reader, type_index)?))
                })();
                let (reg, value) = match parsed {
                    Ok(x) => x,
                    Err(_) => {
                        stats.malformed_subframe += 1;
                        break;
                    }
                };
                let err = handler.write(reg, value);
                if err != 0 && respond {
                    push_error(reply, subframe::WRITE_ERROR, reg, err, budget, &mut overflowed);
                }
            }
            // 写多个
            subframe::WRITE_MULTIPLE_BASE..=subframe::WRITE_MULTIPLE_LAST => {
                let type_index = (ty - subframe::WRITE_MULTIPLE_BASE) as usize;
                let header = (|| -> Result<(u32, u32), CodecError> {
                    Ok((reader.read_varuint()?, reader.read_varuint()?))
                })();
                let (start, count) = match header {
                    Ok(x) => x,
                    Err(_) => {
                        stats.malformed_subframe += 1;
                        break;
                    }
                };
                let mut truncated = false;
                for i in 0..count {
                    let value = match Value::read_from(&mut reader, type_index) {
                        Ok(v) => v,
                        Err(_) => {
                            stats.malformed_subframe += 1;
                            truncated = true;
                            break;
                        }
                    };
                    let reg = start.wrapping_add(i);
                    let err = handler.write(reg, value);
                    if err != 0 && respond {
                        push_error(reply, subframe::WRITE_ERROR, reg, err, budget, &mut overflowed);
                    }
                }
                if truncated {
                    break;
                }
            }
            // 读单个
            subframe::READ_SINGLE_BASE..=subframe::READ_SINGLE_LAST => {
                let type_index = (ty - subframe::READ_SINGLE_BASE) as usize;
                let reg = match reader.read_varuint() {
                    Ok(v) => v,
                    Err(_) => {
                        stats.malformed_subframe += 1;
                        break;
                    }
                };
                if respond {
                    push_read_reply(reply, handler, reg, type_index, budget, &mut overflowed);
                }
            }
            // 读多个
            subframe::READ_MULTIPLE_BASE..=subframe::READ_MULTIPLE_LAST => {
                let type_index = (ty - subframe::READ_MULTIPLE_BASE) as usize;
                let header = (|| -> Result<(u32, u32), CodecError> {
                    Ok((reader.read_varuint()?, reader.read_varuint()?))
                })();
                let (start, count) = match header {
                    Ok(x) => x,
                    Err(_) => {
                        stats.malformed_subframe += 1;
                        break;
                    }
                };
                if respond {
                    // 预算打满后剩余应答整体丢弃，迭代也就此止步
                    for i in 0..count {
                        push_read_reply(
                            reply,
                            handler,
                            start.wrapping_add(i),
                            type_index,
                            budget,
                            &mut overflowed,
                        );
                        if overflowed {
                            break;
                        }
                    }
                }
            }
            // 隧道 客户端→服务端；此类帧只含这一个子帧
            subframe::CLIENT_TO_SERVER => {
                let parsed = (|| -> Result<(u32, &[u8]), CodecError> {
                    let channel = reader.read_varuint()?;
                    let n = reader.read_varuint()? as usize;
                    Ok((channel, reader.read_bytes(n)?))
                })();
                let (channel, data) = match parsed {
                    Ok(x) => x,
                    Err(_) => {
                        stats.malformed_subframe += 1;
                        break;
                    }
                };
                let tunnel = tunnels.iter().find(|t| t.channel == channel);
                if let Some(tunnel) = tunnel {
                    if !data.is_empty() {
                        let accepted = tunnel.push_ingress(data);
                        if accepted < data.len() {
                            stats.receive_overrun += 1;
                        }
                    }
                }
                if respond {
                    push_tunnel_reply(reply, tunnel, channel, budget, &mut overflowed);
                }
                break;
            }
            // 服务端→客户端方向的隧道子帧不该出现在接收路径
            subframe::SERVER_TO_CLIENT => {
                stats.unknown_subframe += 1;
                break;
            }
            _ => {
                stats.unknown_subframe += 1;
                break;
            }
        }
    }
    overflowed
}

fn push_read_reply(
    reply: &mut BytesMut,
    handler: &dyn RegisterHandler,
    reg: u32,
    type_index: usize,
    budget: usize,
    overflowed: &mut bool,
) {
    match handler.read(reg, type_index) {
        Ok(value) => push_reply_single(reply, reg, value, budget, overflowed),
        Err(code) => push_error(reply, subframe::READ_ERROR, reg, code, budget, overflowed),
    }
}

fn push_reply_single(
    reply: &mut BytesMut,
    reg: u32,
    value: Value,
    budget: usize,
    overflowed: &mut bool,
) {
    let need = 1 + varuint::encoded_len(reg) + value.size();
    if reply.len() + need > budget {
        *overflowed = true;
        return;
    }
    reply.put_u8(subframe::REPLY_SINGLE_BASE + value.type_index() as u8);
    varuint::write_varuint(reply, reg);
    value.write_to(reply);
}

fn push_error(
    reply: &mut BytesMut,
    opcode: u8,
    reg: u32,
    code: u32,
    budget: usize,
    overflowed: &mut bool,
) {
    let need = 1 + varuint::encoded_len(reg) + varuint::encoded_len(code);
    if reply.len() + need > budget {
        *overflowed = true;
        return;
    }
    reply.put_u8(opcode);
    varuint::write_varuint(reply, reg);
    varuint::write_varuint(reply, code);
}

/// 0x41 应答：无论有无数据都要回，未知通道回空
fn push_tunnel_reply(
    reply: &mut BytesMut,
    tunnel: Option<&Arc<TunnelShared>>,
    channel: u32,
    budget: usize,
    overflowed: &mut bool,
) {
    let header_worst = 1 + varuint::encoded_len(channel) + 5;
    let space = budget.saturating_sub(reply.len() + header_worst);
    let n = tunnel.map(|t| t.egress_len().min(space)).unwrap_or(0);

    let need = 1 + varuint::encoded_len(channel) + varuint::encoded_len(n as u32) + n;
    if reply.len() + need > budget {
        *overflowed = true;
        return;
    }
    reply.put_u8(subframe::SERVER_TO_CLIENT);
    varuint::write_varuint(reply, channel);
    varuint::write_varuint(reply, n as u32);
    if n > 0 {
        if let Some(tunnel) = tunnel {
            tunnel.drain_egress(n, reply);
        }
    }
}
