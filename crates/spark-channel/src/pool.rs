use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

/// 池化对象在归还时执行的复位钩子。
///
/// # 契约说明（What）
/// - `reclaim` 必须把对象恢复到“刚从工厂创建”时的可复用状态；
/// - 调用发生在 [`Pooled`] 的 `Drop` 路径上，实现不得 panic。
pub trait Reclaim: Send + 'static {
    /// 清空对象状态，为下一次租借做准备。
    fn reclaim(&mut self);
}

/// `ObjectPool` 基于自由链表复用对象，减少高频收发路径上的堆分配。
///
/// # 模块角色（Why）
/// - 接收包、发送批次与通道对象都在连接抖动下被频繁创建与丢弃，统一由池提供来源；
/// - 借助 [`Pooled`] 的 `Drop` 钩子，归还动作与所有权绑定：句柄只能被丢弃一次，
///   因而每个对象恰好归还一次，不存在重复释放或遗漏释放。
///
/// # 核心机制（How）
/// - 内部维护 `parking_lot::Mutex<Vec<T>>` 作为自由链表，租借时优先弹出缓存对象；
/// - `PoolMetrics` 以原子计数跟踪租借、归还、未命中与缓存数量，支撑 [`PoolStats`] 快照；
/// - 归还时先调用 [`Reclaim::reclaim`]，若缓存已达上限则直接丢弃对象。
///
/// # 契约说明（What）
/// - **线程安全**：自由链表与计数均可跨线程访问，多分发线程可共享同一个池；
/// - **后置条件**：`acquire` 返回的对象必定处于复位状态。
pub struct ObjectPool<T: Reclaim> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Reclaim> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Reclaim> ObjectPool<T> {
    /// 默认缓存上限。
    pub const DEFAULT_MAX_CACHED: usize = 1024;

    /// 使用工厂函数创建对象池。
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::with_max_cached(Self::DEFAULT_MAX_CACHED, factory)
    }

    /// 指定自由链表的缓存上限。
    pub fn with_max_cached(
        max_cached: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free_list: Mutex::new(Vec::new()),
                factory: Box::new(factory),
                max_cached,
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// 租借一个对象；自由链表为空时调用工厂新建。
    pub fn acquire(&self) -> Pooled<T> {
        let reused = self.inner.free_list.lock().pop();
        let value = match reused {
            Some(value) => value,
            None => {
                self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
                (self.inner.factory)()
            }
        };
        self.inner.metrics.acquired.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.active.fetch_add(1, Ordering::Relaxed);
        Pooled {
            value: Some(value),
            home: Arc::clone(&self.inner),
        }
    }

    /// 释放自由链表中缓存的全部对象，返回释放数量。
    pub fn shrink_to_fit(&self) -> usize {
        let drained: Vec<T> = std::mem::take(&mut *self.inner.free_list.lock());
        drained.len()
    }

    /// 读取统计快照。
    pub fn stats(&self) -> PoolStats {
        let metrics = &self.inner.metrics;
        PoolStats {
            acquired: metrics.acquired.load(Ordering::Relaxed),
            reclaimed: metrics.reclaimed.load(Ordering::Relaxed),
            active: metrics.active.load(Ordering::Relaxed),
            misses: metrics.misses.load(Ordering::Relaxed),
            cached: self.inner.free_list.lock().len(),
        }
    }
}

impl<T: Reclaim> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// 池统计快照。
///
/// - `acquired` / `reclaimed`：累计租借与归还次数；二者相等且 `active == 0` 说明没有泄漏；
/// - `misses`：自由链表未命中、触发新建的次数；
/// - `cached`：当前缓存在自由链表中的对象数量。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub reclaimed: u64,
    pub active: usize,
    pub misses: u64,
    pub cached: usize,
}

struct PoolInner<T: Reclaim> {
    free_list: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    max_cached: usize,
    metrics: PoolMetrics,
}

impl<T: Reclaim> PoolInner<T> {
    fn reclaim(&self, mut value: T) {
        value.reclaim();
        self.metrics.reclaimed.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .metrics
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
                Some(prev.saturating_sub(1))
            });
        let mut list = self.free_list.lock();
        if list.len() < self.max_cached {
            list.push(value);
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    acquired: AtomicU64,
    reclaimed: AtomicU64,
    active: AtomicUsize,
    misses: AtomicU64,
}

/// 池化对象的租借句柄，`Drop` 时自动复位并归还。
///
/// 句柄不可克隆：所有权即归还责任，编译器保证同一对象不会被归还两次。
pub struct Pooled<T: Reclaim> {
    value: Option<T>,
    home: Arc<PoolInner<T>>,
}

impl<T: Reclaim> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.value.as_ref() {
            Some(value) => value,
            None => unreachable!("pooled value is only taken in drop"),
        }
    }
}

impl<T: Reclaim> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.value.as_mut() {
            Some(value) => value,
            None => unreachable!("pooled value is only taken in drop"),
        }
    }
}

impl<T: Reclaim> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.home.reclaim(value);
        }
    }
}

impl<T: Reclaim + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
