//! 就绪事件分发器与定时器契约。
//!
//! 分发器本身（epoll/kqueue 轮询、定时器堆）不在本 crate 内实现。通道只需要：
//! 注册/注销可读事件、添加周期定时器，以及可重复调用的定时器取消。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{channel::ChannelId, endpoint::SharedEndpoint};

/// 定时器回调的用途标识，分发器在到期时原样回传给 [`Channel::handle_timeout`](crate::Channel::handle_timeout)。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerToken {
    /// 周期性空闲检测。
    InactivityCheck,
}

/// 注册到分发器的接收器形态。
///
/// - `Stream`：字节流端点，需注册可读事件；
/// - `Datagram`：数据报由监听套接字统一收取后分拣，通道不单独注册。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketReceiverKind {
    Stream,
    Datagram,
}

/// 单线程事件循环的分发器接口。
pub trait Dispatcher: Send + Sync {
    /// 为端点注册可读事件，到期回调携带 `channel` 标识。
    fn register_readable(
        &self,
        endpoint: &SharedEndpoint,
        channel: ChannelId,
        receiver: PacketReceiverKind,
    ) -> bool;

    /// 注销端点的可读事件。
    fn deregister_readable(&self, endpoint: &SharedEndpoint) -> bool;

    /// 添加周期定时器；分发器应在每次到期前检查 [`TimerWatch::is_cancelled`]。
    fn add_timer(&self, interval: Duration, channel: ChannelId, token: TimerToken) -> TimerHandle;
}

#[derive(Debug, Default)]
struct TimerState {
    cancelled: AtomicBool,
}

/// 通道持有的定时器句柄。
///
/// # 教案式注释
/// - **逻辑 (How)**：句柄与分发器侧的 [`TimerWatch`] 共享同一个取消标志；
///   `cancel` 置位后释放共享状态，句柄回到“未启动”形态；
/// - **契约 (What)**：对未启动或已取消的句柄调用 `cancel` 是安全的空操作。
#[derive(Debug, Default)]
pub struct TimerHandle {
    state: Option<Arc<TimerState>>,
}

impl TimerHandle {
    /// 创建一对关联的句柄与观察者，供分发器实现 `add_timer` 时使用。
    pub fn issue() -> (TimerHandle, TimerWatch) {
        let state = Arc::new(TimerState::default());
        (
            TimerHandle {
                state: Some(Arc::clone(&state)),
            },
            TimerWatch { state },
        )
    }

    /// 取消定时器，可重复调用。
    pub fn cancel(&mut self) {
        if let Some(state) = self.state.take() {
            state.cancelled.store(true, Ordering::Release);
        }
    }

    /// 定时器是否处于活动状态。
    pub fn is_active(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| !state.cancelled.load(Ordering::Acquire))
    }
}

/// 分发器侧持有的取消观察者。
#[derive(Clone, Debug)]
pub struct TimerWatch {
    state: Arc<TimerState>,
}

impl TimerWatch {
    /// 对应的句柄是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}
