//! 收发计数。
//!
//! # 教案式注释
//! - **意图 (Why)**：进程级的收发总量需要在所有通道间累加；以显式注册对象承载，
//!   由网络接口持有并在启动时创建，测试中每个用例各自实例化，互不串扰；
//! - **逻辑 (How)**：[`NetworkStats`] 以原子计数实现，允许多个分发线程共享；
//!   [`ChannelStats`] 为单通道计数，只在所属分发线程上修改，使用普通整数；
//! - **契约 (What)**：通道每次递增自身计数时同步递增网络接口上的总量。

use std::sync::atomic::{AtomicU64, Ordering};

/// 进程级收发总量。
#[derive(Debug, Default)]
pub struct NetworkStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl NetworkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录发送进展：`bundles` 为本次写完的批次数，`bytes` 为写完的线缆包字节数（过滤前）。
    pub fn record_sent(&self, bundles: u64, bytes: u64) {
        self.packets_sent.fetch_add(bundles, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 记录一次物理接收。
    pub fn record_received(&self, bytes: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 读取快照。
    pub fn snapshot(&self) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// [`NetworkStats`] 的只读快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// 单通道计数。
///
/// `last_tick_bytes_received` 只统计自上一次 `process_packets` 以来的接收量，
/// 是字节级溢出判定的依据。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_tick_bytes_received: u64,
}
