//! 接收路径：字节计数、接收窗口背压、协议握手与逐 tick 的解码分发。

use tracing::{debug, error, warn};

use super::{Channel, ProtocolClass, SendReport, Trust};
use crate::{
    codec::{ProtocolDecoder, RawReader},
    error::DecodeError,
    handler::{MessageContext, MessageHandlers},
    packet::Packet,
};

/// 一次 `process_packets` 的结果。
#[derive(Debug)]
pub enum ProcessOutcome {
    /// 通道已销毁；缓冲包已全部释放，未做任何解码。
    Destroyed { released: usize },
    /// 通道已判定失效，未做任何解码。
    Condemned,
    /// 正常处理。
    Processed(ProcessReport),
}

/// 正常处理一轮的明细。
#[derive(Debug, Default)]
pub struct ProcessReport {
    /// 完整交给解码器且未出错的包数量。
    pub decoded: usize,
    /// 本轮归还到池中的包数量，包含故障后被跳过的包。
    pub released: usize,
    /// 本轮遇到的解码故障。
    pub fault: Option<DecodeError>,
    /// 轮末冲刷发送队列的结果。
    pub sent: SendReport,
}

impl Channel {
    /// 记录一次物理接收。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：字节级背压只衡量“自上一轮处理以来”的负载，
    ///   因此单独累加 `last_tick_bytes_received`，由 `process_packets` 清零；
    /// - **契约 (What)**：超过阈值（严格大于）时，外部通道记录错误并判定失效，
    ///   内部通道只告警；阈值为 0 表示关闭该档位。
    pub fn on_packet_received(&mut self, bytes: usize) {
        let bytes = bytes as u64;
        self.last_received = self.clock.now();
        self.stats.packets_received += 1;
        self.stats.bytes_received += bytes;
        self.stats.last_tick_bytes_received += bytes;
        if let Some(interface) = self.interface() {
            interface.stats().record_received(bytes);
        }

        let Some(limit) = self.config.receive_window.bytes.limit_for(self.trust) else {
            return;
        };
        let buffered = self.stats.last_tick_bytes_received;
        if buffered <= limit {
            return;
        }
        match self.trust {
            Trust::External => {
                error!(
                    channel = %self.label(),
                    buffered,
                    limit,
                    "external channel receive window bytes overflow"
                );
                self.condemn();
            }
            Trust::Internal => warn!(
                channel = %self.label(),
                buffered,
                limit,
                "internal channel receive window bytes overflow"
            ),
        }
    }

    /// 把解码前的包追加到接收窗口的生产槽。
    ///
    /// 生产槽长度超过告警档后：外部通道告警，再超过外部硬上限即判定失效；
    /// 内部通道只在超过内部上限时告警。
    pub fn add_receive_window(&mut self, packet: Packet) {
        let buffered = self.window.push(packet);
        let critical = self.config.receive_window.messages.critical;
        if critical == 0 || buffered <= critical {
            return;
        }

        match self.trust {
            Trust::External => {
                warn!(
                    channel = %self.label(),
                    buffered,
                    limit = critical,
                    "external channel buffered messages over warning threshold"
                );
                let hard = self.config.receive_window.messages.external;
                if hard > 0 && buffered > hard {
                    error!(
                        channel = %self.label(),
                        buffered,
                        limit = hard,
                        "external channel buffered messages overflow"
                    );
                    self.condemn();
                }
            }
            Trust::Internal => {
                let limit = self.config.receive_window.messages.internal;
                if limit > 0 && buffered > limit {
                    warn!(
                        channel = %self.label(),
                        buffered,
                        limit,
                        "internal channel buffered messages overflow"
                    );
                }
            }
        }
    }

    /// 协议识别，每个连接只在首轮处理时执行一次。
    ///
    /// # 教案式说明
    /// - **逻辑 (How)**：窥视生产槽队首的包；匹配替代协议签名时将分类标记为
    ///   [`ProtocolClass::AltFramed`] 并执行握手应答，成功则安装替代协议读取器与过滤器，
    ///   握手读空的首包随即移出窗口；未匹配或握手失败时安装 [`RawReader`]；
    /// - **边界 (What)**：窗口为空时不安装任何解码器，下一轮重试；
    ///   握手失败的连接保持 `AltFramed` 分类，仅解码方式回退到原始分帧。
    pub fn handshake(&mut self) {
        let endpoint = self.endpoint.clone();
        let alt_protocol = self.alt_protocol.clone();
        let Some(front) = self.window.front_mut() else {
            return;
        };

        if let Some(alt) = alt_protocol
            && alt.matches(&**front)
        {
            self.protocol = ProtocolClass::AltFramed;
            if alt.handshake(&mut **front, endpoint.as_ref()) {
                if front.is_consumed() {
                    drop(self.window.pop_front());
                }
                let codec = alt.codec();
                self.decoder = Some(ProtocolDecoder::Alt(codec.reader));
                self.filter = Some(codec.filter);
                debug!(channel = %self.label(), "alternate protocol handshake succeeded");
                return;
            }
            debug!(channel = %self.label(), "alternate protocol handshake failed");
        }

        if self.protocol == ProtocolClass::Undetermined {
            self.protocol = ProtocolClass::Raw;
        }
        self.decoder = Some(ProtocolDecoder::Raw(RawReader::new()));
    }

    /// 每个 tick 的处理入口。
    ///
    /// # 教案式说明
    /// - **执行步骤**：
    ///   1. 清零本 tick 字节计数；通道自带的专属处理表优先于 `handlers`；
    ///   2. 已销毁：记录错误、立即释放缓冲包并返回；已判定失效：记录错误并返回，不做任何解码；
    ///   3. 尚未安装解码器时执行握手；
    ///   4. 翻转接收窗口的生产槽，只消费翻转前的槽，处理期间新到的包留给下一轮；
    ///   5. 按到达顺序逐包解码，每个包处理后立即归还；
    ///   6. 解码故障：查表取消息名称与声明长度用于诊断，清零解码游标并判定失效，
    ///      同批次剩余的包只释放不解码；
    ///   7. 回调产生的回包并入发送队列，随后冲刷。
    pub fn process_packets(&mut self, handlers: &mut MessageHandlers) -> ProcessOutcome {
        self.stats.last_tick_bytes_received = 0;

        if self.destroyed {
            error!(channel = %self.label(), "process_packets on destroyed channel");
            let released = self.window.len();
            self.window.clear();
            return ProcessOutcome::Destroyed { released };
        }
        if self.condemned {
            error!(channel = %self.label(), "process_packets on condemned channel");
            return ProcessOutcome::Condemned;
        }

        if self.decoder.is_none() {
            self.handshake();
        }

        let captured = self.window.swap();
        let batch = self.window.take(captured);
        let peer = self.peer_addr();
        let mut replies = Vec::new();
        let mut report = ProcessReport::default();
        let mut diagnosis = None;

        {
            let table = match self.handlers.as_mut() {
                Some(own) => own,
                None => handlers,
            };
            let mut ctx = MessageContext::new(self.id, peer, &mut replies);
            for mut packet in batch {
                report.released += 1;
                if report.fault.is_some() {
                    continue;
                }
                let Some(decoder) = self.decoder.as_mut() else {
                    continue;
                };
                let reader = decoder.reader_mut();
                match reader.process(table, &mut ctx, &mut packet) {
                    Ok(()) => report.decoded += 1,
                    Err(fault) => {
                        let message_id = reader.current_message_id();
                        let (name, declared) = table.describe(message_id);
                        diagnosis = Some((
                            name.to_owned(),
                            message_id,
                            declared,
                            reader.current_message_length(),
                        ));
                        reader.reset_cursor();
                        report.fault = Some(fault);
                    }
                }
            }
        }

        if let (Some(fault), Some((name, message_id, declared, current_length))) =
            (report.fault.as_ref(), diagnosis)
        {
            warn!(
                channel = %self.label(),
                code = fault.code(),
                message_name = %name,
                message_id,
                declared_length = declared,
                current_length,
                error = %fault,
                "packet invalid, discarding the rest of the batch"
            );
            self.condemn();
        }

        self.bundles.extend(replies);
        report.sent = self.send(None);
        ProcessOutcome::Processed(report)
    }
}
