//! 通道配置。
//!
//! ## 意图（Why）
//! - 空闲超时、接收窗口溢出阈值与包跟踪开关都是部署相关的数值，集中为一个值类型，
//!   由宿主加载后以 `Arc<ChannelConfig>` 注入通道池；
//! - 配置文件的发现与热更新不在本 crate 范围内，这里只提供 TOML 文本解析入口。
//!
//! ## 契约（What）
//! - 所有字段均有默认值，TOML 中缺省的键沿用默认；
//! - 阈值为 0 表示关闭对应档位；超时周期不大于 0 表示关闭空闲检测；
//! - 阈值比较一律为严格大于：恰好达到阈值不会触发。
//!
//! ```toml
//! trace_packets = false
//!
//! [inactivity]
//! internal_timeout = 60.0
//! external_timeout = 60.0
//! check_period = 5.0
//!
//! [receive_window.messages]
//! critical = 32
//! internal = 65535
//! external = 256
//!
//! [receive_window.bytes]
//! internal = 0
//! external = 65535
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::{channel::Trust, error::ChannelError};

/// 通道配置根节点。
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub inactivity: InactivityConfig,
    pub receive_window: ReceiveWindowConfig,
    /// 打开后每次入队发送批次都立即冲刷，便于逐包跟踪。
    pub trace_packets: bool,
}

impl ChannelConfig {
    /// 解析 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ChannelError> {
        toml::from_str(text).map_err(|err| ChannelError::Config(Box::new(err)))
    }
}

/// 空闲检测参数，单位为秒。
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct InactivityConfig {
    pub internal_timeout: f64,
    pub external_timeout: f64,
    pub check_period: f64,
}

impl InactivityConfig {
    /// 按信任等级取超时周期；不大于 0 时返回 `None` 表示关闭检测。
    pub fn timeout_for(&self, trust: Trust) -> Option<Duration> {
        let seconds = match trust {
            Trust::Internal => self.internal_timeout,
            Trust::External => self.external_timeout,
        };
        positive_seconds(seconds)
    }

    /// 轮询间隔；非法值回落到默认 5 秒。
    pub fn check_interval(&self) -> Duration {
        positive_seconds(self.check_period).unwrap_or(DEFAULT_CHECK_PERIOD)
    }
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            internal_timeout: 60.0,
            external_timeout: 60.0,
            check_period: DEFAULT_CHECK_PERIOD.as_secs_f64(),
        }
    }
}

/// 接收窗口溢出阈值。
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReceiveWindowConfig {
    pub messages: MessageThresholds,
    pub bytes: ByteThresholds,
}

/// 消息条数阈值。
///
/// - `critical`：告警档，队列长度超过即告警（对外部通道）；
/// - `external`：外部通道的硬上限，超过即判定失效；
/// - `internal`：内部通道的告警上限，只告警不判定失效。
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageThresholds {
    pub critical: usize,
    pub internal: usize,
    pub external: usize,
}

impl Default for MessageThresholds {
    fn default() -> Self {
        Self {
            critical: 32,
            internal: 65535,
            external: 256,
        }
    }
}

/// 单个 tick 内的接收字节阈值。
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ByteThresholds {
    pub internal: u64,
    pub external: u64,
}

impl ByteThresholds {
    /// 按信任等级取阈值；0 表示关闭。
    pub fn limit_for(&self, trust: Trust) -> Option<u64> {
        let limit = match trust {
            Trust::Internal => self.internal,
            Trust::External => self.external,
        };
        (limit > 0).then_some(limit)
    }
}

impl Default for ByteThresholds {
    fn default() -> Self {
        Self {
            internal: 0,
            external: 65535,
        }
    }
}

const DEFAULT_CHECK_PERIOD: Duration = Duration::from_secs(5);

fn positive_seconds(seconds: f64) -> Option<Duration> {
    (seconds.is_finite() && seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}
