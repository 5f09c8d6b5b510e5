//! 隧道流
//!
//! 每条隧道两个有界字节环：ingress 存客户端 0x40 送来的数据，由
//! 本端 read 取走；egress 存本端 write 的数据，等下一次轮询装进
//! 0x41 响应。read 有 1 字节即完成；egress 满时 write 挂起，等轮
//! 询腾出空间再被唤醒。

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub(crate) struct TunnelInner {
    pub ingress: BytesMut,
    pub egress: BytesMut,
    pub capacity: usize,
    pub read_waker: Option<Waker>,
    pub write_waker: Option<Waker>,
}

pub(crate) struct TunnelShared {
    pub channel: u32,
    inner: Mutex<TunnelInner>,
}

impl TunnelShared {
    pub fn new(channel: u32, ingress: BytesMut, egress: BytesMut, capacity: usize) -> Self {
        Self {
            channel,
            inner: Mutex::new(TunnelInner {
                ingress,
                egress,
                capacity,
                read_waker: None,
                write_waker: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TunnelInner> {
        // 锁毒化只可能来自持锁方恐慌，数据本身仍一致
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 收取客户端数据，返回实际接收字节数（超出环容量的部分丢弃）
    pub fn push_ingress(&self, data: &[u8]) -> usize {
        let mut inner = self.lock();
        let free = inner.capacity - inner.ingress.len();
        let n = free.min(data.len());
        inner.ingress.extend_from_slice(&data[..n]);
        if n > 0 {
            if let Some(waker) = inner.read_waker.take() {
                waker.wake();
            }
        }
        n
    }

    /// 当前待发往客户端的字节数
    pub fn egress_len(&self) -> usize {
        self.lock().egress.len()
    }

    /// 取出至多 n 字节 egress 数据追加到 out，并唤醒挂起的写入方
    pub fn drain_egress(&self, n: usize, out: &mut BytesMut) {
        let mut inner = self.lock();
        let n = n.min(inner.egress.len());
        if n == 0 {
            return;
        }
        let chunk = inner.egress.split_to(n);
        out.extend_from_slice(&chunk);
        if let Some(waker) = inner.write_waker.take() {
            waker.wake();
        }
    }
}

/// 隧道端点，实现 tokio 异步读写
pub struct Tunnel {
    shared: Arc<TunnelShared>,
}

impl Tunnel {
    pub(crate) fn new(shared: Arc<TunnelShared>) -> Self {
        Self { shared }
    }

    /// 此隧道的通道号
    pub fn channel(&self) -> u32 {
        self.shared.channel
    }
}

impl AsyncRead for Tunnel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = self.shared.lock();
        if inner.ingress.is_empty() {
            inner.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = buf.remaining().min(inner.ingress.len());
        let chunk = inner.ingress.split_to(n);
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for Tunnel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.shared.lock();
        let free = inner.capacity - inner.egress.len();
        if free == 0 {
            inner.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = free.min(data.len());
        inner.egress.extend_from_slice(&data[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn make_tunnel(capacity: usize) -> (Arc<TunnelShared>, Tunnel) {
        let shared = Arc::new(TunnelShared::new(
            7,
            BytesMut::with_capacity(capacity),
            BytesMut::with_capacity(capacity),
            capacity,
        ));
        (shared.clone(), Tunnel::new(shared))
    }

    #[tokio::test]
    async fn test_read_wakes_on_ingress() {
        let (shared, mut tunnel) = make_tunnel(64);
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let n = tunnel.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });
        // 等读取方挂起后再投递
        tokio::task::yield_now().await;
        assert_eq!(shared.push_ingress(b"hello"), 5);
        assert_eq!(reader.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_write_parks_until_drained() {
        let (shared, mut tunnel) = make_tunnel(4);
        tunnel.write_all(b"abcd").await.unwrap();
        assert_eq!(shared.egress_len(), 4);

        // 环已满，第五个字节要等轮询腾空间
        let writer = tokio::spawn(async move {
            tunnel.write_all(b"e").await.unwrap();
        });
        tokio::task::yield_now().await;

        let mut out = BytesMut::new();
        shared.drain_egress(4, &mut out);
        assert_eq!(&out[..], b"abcd");
        writer.await.unwrap();
        assert_eq!(shared.egress_len(), 1);
    }

    #[test]
    fn test_ingress_overflow_is_dropped() {
        let (shared, _tunnel) = make_tunnel(4);
        assert_eq!(shared.push_ingress(b"abcdef"), 4);
        assert_eq!(shared.push_ingress(b"x"), 0);
    }
}
