//! 出站消息批次。
//!
//! 一个 [`Bundle`] 收集一次性发送的若干条应用消息，按线缆包切分保存；通道在冲刷时
//! 按入队顺序逐个交给网络接口写出，随后丢弃句柄使批次回到 [`BundlePool`]。

use bytes::{BufMut, BytesMut};

use crate::{
    error::ChannelError,
    handler::{MessageId, MessageLength},
    pool::{ObjectPool, Pooled, Reclaim},
};

/// 池化的批次句柄。
pub type PooledBundle = Pooled<Bundle>;

/// 批次对象池。
pub type BundlePool = ObjectPool<Bundle>;

/// 单个线缆包允许的最大字节数，超出时切分到下一个包。
pub const MAX_PACKET_SIZE: usize = 1460;

/// 出站消息批次。
///
/// # 契约说明（What）
/// - `write_message` 使用与 [`RawReader`](crate::RawReader) 对称的分帧：
///   `u16 LE` 消息号，变长消息追加 `u16 LE` 长度，随后为消息体；
/// - 单条消息不会被拆到两个线缆包中间以外的位置：若当前包放不下则开启新包，
///   超过 [`MAX_PACKET_SIZE`] 的消息独占一个包；
/// - `total_size` 为全部线缆包字节数之和，用于发送计数。
#[derive(Debug, Default)]
pub struct Bundle {
    packets: Vec<BytesMut>,
    messages: usize,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条应用消息。
    pub fn write_message(
        &mut self,
        message_id: MessageId,
        length: MessageLength,
        body: &[u8],
    ) -> Result<(), ChannelError> {
        let header = match length {
            MessageLength::Fixed(expected) => {
                if body.len() != usize::from(expected) {
                    return Err(ChannelError::LengthMismatch {
                        message_id,
                        expected: usize::from(expected),
                        actual: body.len(),
                    });
                }
                2
            }
            MessageLength::Variable => {
                if body.len() > usize::from(u16::MAX) {
                    return Err(ChannelError::MessageTooLarge {
                        message_id,
                        len: body.len(),
                        max: usize::from(u16::MAX),
                    });
                }
                4
            }
        };

        let frame_len = header + body.len();
        let packet = self.packet_with_room(frame_len);
        packet.put_u16_le(message_id);
        if length == MessageLength::Variable {
            // 上方已校验长度可用 u16 表达。
            packet.put_u16_le(body.len() as u16);
        }
        packet.put_slice(body);
        self.messages += 1;
        Ok(())
    }

    /// 追加一个已编码好的线缆包。
    pub fn push_packet(&mut self, bytes: &[u8]) {
        self.packets.push(BytesMut::from(bytes));
    }

    /// 全部线缆包。
    pub fn packets(&self) -> impl Iterator<Item = &[u8]> {
        self.packets.iter().map(|packet| &packet[..])
    }

    /// 线缆包数量。
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// 通过 `write_message` 写入的消息条数。
    pub fn message_count(&self) -> usize {
        self.messages
    }

    /// 批次总字节数。
    pub fn total_size(&self) -> usize {
        self.packets.iter().map(BytesMut::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_size() == 0
    }

    fn packet_with_room(&mut self, frame_len: usize) -> &mut BytesMut {
        let fits = self
            .packets
            .last()
            .is_some_and(|last| !last.is_empty() && last.len() + frame_len <= MAX_PACKET_SIZE);
        if !fits {
            self.packets
                .push(BytesMut::with_capacity(frame_len.min(MAX_PACKET_SIZE)));
        }
        let last = self.packets.len() - 1;
        &mut self.packets[last]
    }
}

impl Reclaim for Bundle {
    fn reclaim(&mut self) {
        self.packets.clear();
        self.messages = 0;
    }
}

impl ObjectPool<Bundle> {
    /// 创建默认的批次池。
    pub fn bundles() -> Self {
        ObjectPool::new(Bundle::new)
    }
}
