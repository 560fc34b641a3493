//! 空闲检测。

use std::time::Duration;

use super::Channel;
use crate::dispatcher::TimerToken;

impl Channel {
    /// 启动周期性空闲检测。
    ///
    /// 先停止已有的检测；`period` 为 `None` 或零时关闭检测，不添加定时器。
    /// 否则记录超时周期、刷新最后活跃时间，并以 `check_interval` 为周期向分发器添加定时器。
    pub fn start_inactivity_detection(
        &mut self,
        period: Option<Duration>,
        check_interval: Duration,
    ) {
        self.stop_inactivity_detection();
        let Some(period) = period.filter(|period| !period.is_zero()) else {
            return;
        };
        self.inactivity_period = Some(period);
        self.last_received = self.clock.now();
        if let Some(interface) = self.interface() {
            self.inactivity_timer =
                interface
                    .dispatcher()
                    .add_timer(check_interval, self.id, TimerToken::InactivityCheck);
        }
    }

    /// 停止空闲检测，可重复调用。
    pub fn stop_inactivity_detection(&mut self) {
        self.inactivity_timer.cancel();
        self.inactivity_period = None;
    }

    /// 当前生效的超时周期。
    pub fn inactivity_period(&self) -> Option<Duration> {
        self.inactivity_period
    }

    /// 分发器定时器到期回调。
    ///
    /// 距最后活跃超过超时周期时通知网络接口；是否销毁由接口决定。
    pub fn handle_timeout(&mut self, token: TimerToken) {
        match token {
            TimerToken::InactivityCheck => {
                let Some(period) = self.inactivity_period else {
                    return;
                };
                let idle = self.clock.now().saturating_duration_since(self.last_received);
                if idle > period
                    && let Some(interface) = self.interface()
                {
                    interface.on_channel_timeout(self.id);
                }
            }
        }
    }

    /// 按信任等级与配置重启检测；已销毁的通道不再启动。
    pub(super) fn restart_inactivity_detection(&mut self) {
        if self.destroyed {
            return;
        }
        let inactivity = &self.config.inactivity;
        let period = inactivity.timeout_for(self.trust);
        let check_interval = inactivity.check_interval();
        self.start_inactivity_detection(period, check_interval);
    }
}
