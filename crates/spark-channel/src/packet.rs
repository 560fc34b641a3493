//! 入站数据包缓冲。
//!
//! [`PacketBuf`] 是一次物理接收得到的字节块，附带读游标与传输类型；[`Packet`] 为其池化句柄，
//! 句柄被丢弃即归还到 [`PacketPool`]。解码器通过游标消费字节，握手可能把首包完全读空。

use bytes::BytesMut;

use crate::{
    endpoint::TransportKind,
    pool::{ObjectPool, Pooled, Reclaim},
};

/// 池化的入站包句柄。
pub type Packet = Pooled<PacketBuf>;

/// 入站包对象池。
pub type PacketPool = ObjectPool<PacketBuf>;

/// 带读游标的入站字节缓冲。
#[derive(Debug)]
pub struct PacketBuf {
    data: BytesMut,
    read_pos: usize,
    kind: TransportKind,
}

impl PacketBuf {
    /// 创建空缓冲。
    pub fn new(kind: TransportKind) -> Self {
        Self {
            data: BytesMut::new(),
            read_pos: 0,
            kind,
        }
    }

    /// 包所属的传输类型。
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// 尚未被读取的字节数。
    pub fn length(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// 写入的总字节数，与读游标无关。
    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    /// 是否已被完全读取。
    pub fn is_consumed(&self) -> bool {
        self.length() == 0
    }

    /// 未读部分的只读视图。
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// 追加字节。
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// 推进读游标，超出部分截断到末尾。
    pub fn advance(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count).min(self.data.len());
    }

    /// 标记整个包已读完。
    pub fn consume_all(&mut self) {
        self.read_pos = self.data.len();
    }
}

impl Default for PacketBuf {
    fn default() -> Self {
        Self::new(TransportKind::Stream)
    }
}

impl Reclaim for PacketBuf {
    fn reclaim(&mut self) {
        self.data.clear();
        self.read_pos = 0;
        self.kind = TransportKind::Stream;
    }
}

impl ObjectPool<PacketBuf> {
    /// 创建默认的入站包池。
    pub fn packets() -> Self {
        ObjectPool::new(PacketBuf::default)
    }

    /// 租借一个入站包并写入 `bytes`。
    pub fn packet(&self, kind: TransportKind, bytes: &[u8]) -> Packet {
        let mut packet = self.acquire();
        packet.kind = kind;
        packet.extend_from_slice(bytes);
        packet
    }
}
