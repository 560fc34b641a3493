//! 网络接口契约。
//!
//! # 教案式注释
//! - **意图 (Why)**：通道需要回调“拥有它的网络接口”：连接消失、空闲超时、延迟发送登记，
//!   以及实际的批次写出；接口由宿主实现，通道只持有 `Weak` 引用，避免与接口互相持有；
//! - **逻辑 (How)**：`send_bundle` 提供默认实现 [`write_bundle`]，逐个线缆包经可选的
//!   [`PacketFilter`] 封帧后写入端点，处理部分写入；写入位置记录在 [`WriteProgress`] 中，
//!   端点暂时写不进去时调用方保留批次与游标，下次冲刷从断点继续；
//! - **契约 (What)**：所有回调都在通道所属的分发线程上同步调用，实现不得反向锁定同一通道。

use std::{io, net::SocketAddr};

use bytes::BytesMut;

use crate::{
    bundle::Bundle,
    channel::ChannelId,
    codec::PacketFilter,
    dispatcher::Dispatcher,
    endpoint::Endpoint,
    error::{self, ChannelError, map_io_error},
    stats::NetworkStats,
};

/// 拥有通道的网络接口。
pub trait NetworkInterface: Send + Sync {
    /// 通道所属的分发器。
    fn dispatcher(&self) -> &dyn Dispatcher;

    /// 进程级收发计数。
    fn stats(&self) -> &NetworkStats;

    /// 通道最终销毁前的通知。
    fn on_channel_gone(&self, channel: ChannelId, peer: Option<SocketAddr>);

    /// 空闲超时通知；是否销毁通道由接口决定。
    fn on_channel_timeout(&self, channel: ChannelId);

    /// 登记通道，使其在本 tick 末尾统一冲刷。
    fn delayed_send(&self, channel: ChannelId);

    /// 撤销延迟发送登记，返回此前是否已登记。
    ///
    /// 通道在更换端点前调用：已登记时先用旧端点冲刷发送队列。
    fn take_delayed(&self, channel: ChannelId) -> bool;

    /// 从 `progress` 记录的位置起写出一个批次。
    fn send_bundle(
        &self,
        endpoint: &dyn Endpoint,
        filter: Option<&dyn PacketFilter>,
        bundle: &Bundle,
        progress: &mut WriteProgress,
    ) -> Result<(), ChannelError> {
        write_bundle(endpoint, filter, bundle, progress)
    }
}

/// 批次的写出位置。
///
/// - `packets`：已完整写出的线缆包数量；
/// - `offset`：下一个线缆包（封帧后）已写出的字节数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteProgress {
    pub packets: usize,
    pub offset: usize,
}

impl WriteProgress {
    /// 是否已有字节写到端点上。
    pub fn is_started(&self) -> bool {
        self.packets > 0 || self.offset > 0
    }
}

/// 从断点起逐包写出批次。
///
/// - 部分写入时继续写剩余字节；端点返回 0 视为对端不再接收；
/// - 任何错误返回时 `progress` 停在最后一个成功写出的字节之后，
///   `WouldBlock` 可通过 [`ChannelError::is_would_block`] 识别，调用方据此稍后重试；
/// - 过滤器对同一线缆包的封帧结果必须稳定，续写时会重新封帧并跳过已写出的前缀。
pub fn write_bundle(
    endpoint: &dyn Endpoint,
    filter: Option<&dyn PacketFilter>,
    bundle: &Bundle,
    progress: &mut WriteProgress,
) -> Result<(), ChannelError> {
    let mut framed = BytesMut::new();
    for packet in bundle.packets().skip(progress.packets) {
        let wire: &[u8] = match filter {
            Some(filter) => {
                framed.clear();
                filter
                    .encode(packet, &mut framed)
                    .map_err(|err| map_io_error(error::FILTER, err))?;
                &framed[..]
            }
            None => packet,
        };
        write_from(endpoint, wire, &mut progress.offset)?;
        progress.packets += 1;
        progress.offset = 0;
    }
    Ok(())
}

fn write_from(
    endpoint: &dyn Endpoint,
    wire: &[u8],
    offset: &mut usize,
) -> Result<(), ChannelError> {
    while *offset < wire.len() {
        let written = endpoint
            .send(&wire[*offset..])
            .map_err(|err| map_io_error(error::SEND, err))?;
        if written == 0 {
            return Err(map_io_error(
                error::SEND,
                io::Error::from(io::ErrorKind::WriteZero),
            ));
        }
        *offset += written;
    }
    Ok(())
}
