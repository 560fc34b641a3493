//! 发送路径：批次入队、冲刷与延迟发送。

use tracing::{debug, error, warn};

use super::Channel;
use crate::{
    bundle::PooledBundle,
    endpoint::TransportKind,
    error::ChannelError,
    interface::WriteProgress,
};

/// 一次冲刷的结果。
#[derive(Debug, Default)]
pub struct SendReport {
    /// 完整写出的批次数量。
    pub bundles_sent: usize,
    /// 本次完整写出的线缆包字节数（过滤前）。
    pub bytes_sent: u64,
    /// 未写出即归还的批次数量。
    pub discarded: usize,
    /// 端点缓冲区已满时仍留在队列中、等待下次冲刷的批次数量。
    pub pending: usize,
    /// 端点缓冲区已满，稍后可重试。
    pub would_block: bool,
    /// 导致批次被丢弃的错误；`WouldBlock` 不在此列。
    pub error: Option<ChannelError>,
}

impl SendReport {
    /// 队列是否已全部写出。
    pub fn is_complete(&self) -> bool {
        self.discarded == 0 && self.pending == 0 && self.error.is_none()
    }
}

impl Channel {
    /// 追加批次到发送队列；打开包跟踪时立即冲刷。
    pub fn push_bundle(&mut self, bundle: PooledBundle) {
        self.bundles.push_back(bundle);
        if self.config.trace_packets {
            self.send(None);
        }
    }

    /// 冲刷发送队列。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 已销毁：记录错误，丢弃队列与参数中的全部批次，不写出任何字节，
    ///     以 [`ChannelError::Destroyed`] 上报；未绑定端点时同理，以 [`ChannelError::NoEndpoint`] 上报；
    ///   - 否则先把 `bundle` 入队，再按入队顺序逐个经网络接口写出；每写完一个线缆包累加字节计数，
    ///     每写完一个批次累加批次计数并把批次归还到池中；
    ///   - 端点返回 `WouldBlock`：未写完的批次连同写出游标留在队首，其后的批次保持原序，
    ///     通过 [`SendReport::would_block`] 上报，下次冲刷从断点继续，字节流不会出现半截帧；
    ///   - 其他写出错误：剩余批次全部丢弃；若字节流端点上已写出批次的一部分，
    ///     对端的分帧已经错位，通道随即判定失效。
    pub fn send(&mut self, bundle: Option<PooledBundle>) -> SendReport {
        let mut report = SendReport::default();

        if self.destroyed {
            report.discarded = self.bundles.len() + usize::from(bundle.is_some());
            error!(
                channel = %self.label(),
                discarded = report.discarded,
                "send on destroyed channel"
            );
            self.discard_bundles();
            report.error = Some(ChannelError::Destroyed {
                label: self.label(),
            });
            return report;
        }

        if let Some(bundle) = bundle {
            self.bundles.push_back(bundle);
        }
        if self.bundles.is_empty() {
            return report;
        }

        let Some((interface, endpoint)) = self.interface().zip(self.endpoint.clone()) else {
            report.discarded = self.bundles.len();
            warn!(
                channel = %self.label(),
                discarded = report.discarded,
                "no endpoint bound, discarding queued bundles"
            );
            self.discard_bundles();
            report.error = Some(ChannelError::NoEndpoint);
            return report;
        };

        let filter = self.filter.clone();
        while let Some(bundle) = self.bundles.front() {
            let before = self.send_progress.packets;
            let result = interface.send_bundle(
                &*endpoint,
                filter.as_deref(),
                bundle,
                &mut self.send_progress,
            );
            let bytes: u64 = bundle
                .packets()
                .skip(before)
                .take(self.send_progress.packets - before)
                .map(|packet| packet.len() as u64)
                .sum();
            let completed = result.is_ok();

            self.stats.bytes_sent += bytes;
            report.bytes_sent += bytes;
            interface.stats().record_sent(u64::from(completed), bytes);

            match result {
                Ok(()) => {
                    drop(self.bundles.pop_front());
                    self.send_progress = WriteProgress::default();
                    self.stats.packets_sent += 1;
                    report.bundles_sent += 1;
                }
                Err(err) if err.is_would_block() => {
                    report.would_block = true;
                    report.pending = self.bundles.len();
                    debug!(
                        channel = %self.label(),
                        pending = report.pending,
                        written_packets = self.send_progress.packets,
                        written_offset = self.send_progress.offset,
                        "endpoint would block, keeping bundles for the next flush"
                    );
                    break;
                }
                Err(err) => {
                    let torn = self.transport == TransportKind::Stream
                        && self.send_progress.is_started();
                    report.discarded = self.bundles.len();
                    warn!(
                        channel = %self.label(),
                        code = err.code(),
                        error = %err,
                        discarded = report.discarded,
                        torn,
                        "bundle send failed, discarding remaining bundles"
                    );
                    self.discard_bundles();
                    if torn {
                        self.condemn();
                    }
                    report.error = Some(err);
                    break;
                }
            }
        }
        report
    }

    /// 登记到网络接口，由其在本 tick 末尾统一冲刷。
    pub fn delayed_send(&self) {
        if let Some(interface) = self.interface() {
            interface.delayed_send(self.id);
        }
    }

    /// 发送队列中全部批次的字节数之和。
    pub fn bundles_length(&self) -> usize {
        self.bundles.iter().map(|bundle| bundle.total_size()).sum()
    }

    /// 队首批次的写出游标；没有半途批次时为零。
    pub fn send_progress(&self) -> WriteProgress {
        self.send_progress
    }

    /// 归还队列中的全部批次并清零写出游标。
    pub(super) fn discard_bundles(&mut self) {
        self.bundles.clear();
        self.send_progress = WriteProgress::default();
    }
}
