//! 双缓冲接收窗口。
//!
//! ## 意图（Why）
//! - 接收器在处理循环进行中仍可能追加新包；处理循环开始时交换生产槽，
//!   本轮只消费交换前的槽，新到达的包落入另一个槽，留待下一轮。
//!
//! ## 契约（What）
//! - 两个槽之一为“生产槽”，[`ReceiveWindow::push`] 只写入生产槽；
//! - [`ReceiveWindow::swap`] 翻转生产槽并返回被捕获的旧槽，调用方随后以
//!   [`ReceiveWindow::take`] 取走其中全部包；
//! - 交换前入队的包必定属于被捕获的槽，交换后入队的包必定不属于。

use std::{collections::VecDeque, mem};

use crate::packet::Packet;

/// 接收窗口的槽位标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WindowSlot {
    First,
    Second,
}

impl WindowSlot {
    /// 另一个槽位。
    pub fn other(self) -> Self {
        match self {
            WindowSlot::First => WindowSlot::Second,
            WindowSlot::Second => WindowSlot::First,
        }
    }

    fn index(self) -> usize {
        match self {
            WindowSlot::First => 0,
            WindowSlot::Second => 1,
        }
    }
}

/// 由两个先进先出队列构成的接收窗口。
#[derive(Debug)]
pub struct ReceiveWindow {
    slots: [VecDeque<Packet>; 2],
    producer: WindowSlot,
}

impl ReceiveWindow {
    pub fn new() -> Self {
        Self {
            slots: [VecDeque::new(), VecDeque::new()],
            producer: WindowSlot::First,
        }
    }

    /// 追加到生产槽，返回生产槽当前长度。
    pub fn push(&mut self, packet: Packet) -> usize {
        let slot = &mut self.slots[self.producer.index()];
        slot.push_back(packet);
        slot.len()
    }

    /// 当前生产槽。
    pub fn producer_slot(&self) -> WindowSlot {
        self.producer
    }

    /// 生产槽队首的包，握手探测使用。
    pub fn front_mut(&mut self) -> Option<&mut Packet> {
        self.slots[self.producer.index()].front_mut()
    }

    /// 移出生产槽队首的包。
    pub fn pop_front(&mut self) -> Option<Packet> {
        self.slots[self.producer.index()].pop_front()
    }

    /// 翻转生产槽，返回被捕获的旧槽。
    pub fn swap(&mut self) -> WindowSlot {
        let captured = self.producer;
        self.producer = captured.other();
        captured
    }

    /// 取走指定槽中的全部包。
    pub fn take(&mut self, slot: WindowSlot) -> VecDeque<Packet> {
        mem::take(&mut self.slots[slot.index()])
    }

    /// 两个槽的包总数。
    pub fn len(&self) -> usize {
        self.slots.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(VecDeque::is_empty)
    }

    /// 释放全部包并把生产槽复位为第一个槽，返回其中仍有未读字节的包数量。
    pub fn clear(&mut self) -> usize {
        let mut discarded = 0;
        for slot in &mut self.slots {
            discarded += slot.drain(..).filter(|packet| packet.length() > 0).count();
        }
        self.producer = WindowSlot::First;
        discarded
    }
}

impl Default for ReceiveWindow {
    fn default() -> Self {
        Self::new()
    }
}
