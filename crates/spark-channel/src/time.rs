//! 可注入时钟。
//!
//! 通道的最后活跃时间戳与空闲判定都经由 [`Clock`] 获取当前时间，测试使用 [`MockClock`]
//! 手动推进虚拟时间，从而无需真实等待即可覆盖超时分支。

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// 抽象可注入的单调时钟。
///
/// # 契约说明（What）
/// - `now` 必须单调不减；
/// - 实现需满足 `Send + Sync + 'static`，以便在通道池中共享。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前时间点。
    fn now(&self) -> Instant;
}

/// 基于 [`Instant::now`] 的系统时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手动推进的虚拟时钟。
///
/// # 教案式注释
/// - **意图 (Why)**：空闲检测依赖“距离最后活跃的时间差”，真实时间会让测试不可复现；
/// - **逻辑 (How)**：记录构造时的 `origin`，`now` 返回 `origin + offset`，`advance` 只增加 `offset`；
/// - **契约 (What)**：克隆实例共享同一偏移量，任何一个副本推进都会被其他副本观察到。
#[derive(Clone)]
pub struct MockClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// 以当前真实时间为原点创建虚拟时钟。
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// 将虚拟时间向前推进 `delta`。
    pub fn advance(&self, delta: Duration) {
        let mut offset = self.offset.lock();
        *offset = offset.saturating_add(delta);
    }

    /// 返回自原点以来经过的虚拟时长。
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockClock")
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}
