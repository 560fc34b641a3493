//! 共享句柄与通道对象池。
//!
//! # 教案式注释
//! - **意图 (Why)**：通道同时被“创建方”与“登记表”持有，任何一方都可能先放手；
//!   手工增减引用计数容易漏减或多减，改由 `Arc` 的强引用承担计数；
//! - **逻辑 (How)**：[`ChannelHandle`] 包装 `Arc<Mutex<Pooled<Channel>>>`，克隆即增加引用，
//!   丢弃即减少引用；最后一个句柄丢弃时 [`Pooled`] 的 `Drop` 把通道交还 [`ChannelPool`]，
//!   归还钩子在复位前完成最终销毁；
//! - **契约 (What)**：[`ChannelHandle::destroy`] 消费句柄，编译期杜绝“销毁后继续使用同一句柄”。

use std::{fmt, sync::Arc};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use super::{Channel, ChannelBinding, ChannelId};
use crate::{
    config::ChannelConfig,
    interface::NetworkInterface,
    pool::{ObjectPool, PoolStats, Pooled},
    time::Clock,
};

/// 通道的共享强引用。
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<Mutex<Pooled<Channel>>>,
}

impl ChannelHandle {
    pub fn new(channel: Pooled<Channel>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(channel)),
        }
    }

    /// 锁定通道。同一分发线程内不得嵌套锁定。
    pub fn lock(&self) -> MappedMutexGuard<'_, Channel> {
        MutexGuard::map(self.inner.lock(), |channel| &mut **channel)
    }

    pub fn id(&self) -> ChannelId {
        self.lock().id()
    }

    /// 当前强引用数量。
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// 两个句柄是否指向同一通道。
    pub fn ptr_eq(&self, other: &ChannelHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 销毁通道并释放调用方持有的引用。
    pub fn destroy(self) {
        self.lock().destroy();
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(channel) => f
                .debug_struct("ChannelHandle")
                .field("channel", &**channel)
                .field("refs", &self.ref_count())
                .finish(),
            None => f
                .debug_struct("ChannelHandle")
                .field("refs", &self.ref_count())
                .finish_non_exhaustive(),
        }
    }
}

/// 通道对象池。
///
/// 池中对象均为未绑定状态，共享同一份配置与时钟。
#[derive(Clone, Debug)]
pub struct ChannelPool {
    pool: ObjectPool<Channel>,
}

impl ChannelPool {
    pub fn new(config: Arc<ChannelConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: ObjectPool::new(move || {
                Channel::unbound(Arc::clone(&config), Arc::clone(&clock))
            }),
        }
    }

    /// 租借一个未绑定的通道。
    pub fn acquire(&self) -> Pooled<Channel> {
        self.pool.acquire()
    }

    /// 租借通道、绑定端点并包装成共享句柄。
    pub fn open(
        &self,
        interface: &Arc<dyn NetworkInterface>,
        binding: ChannelBinding,
    ) -> ChannelHandle {
        let mut channel = self.pool.acquire();
        channel.bind(interface, binding);
        ChannelHandle::new(channel)
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
