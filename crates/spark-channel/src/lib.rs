#![deny(unsafe_code)]

//! # spark-channel
//!
//! ## 定位与职责（Why）
//! - 承载游戏服务器网络层中“单条对端连接”的全部状态：协议识别、接收窗口缓冲、
//!   批量发送、空闲检测与内存受限的背压策略；
//! - 位于就绪事件分发器（边沿触发）与应用层消息处理表之间，所有操作都在单线程事件循环上
//!   以非阻塞方式执行。
//!
//! ## 架构嵌入（Where）
//! - `channel`：核心状态机 [`Channel`]、共享句柄 [`ChannelHandle`] 与对象池 [`ChannelPool`]；
//! - `window`：双缓冲接收窗口 [`ReceiveWindow`]；
//! - `codec`：解码器契约、内置原始二进制分帧 [`RawReader`] 与替代协议（WebSocket 升级）探测；
//! - `pool` / `packet` / `bundle`：池化对象的租借与归还（`Drop` 即归还）；
//! - `endpoint` / `dispatcher` / `interface`：外部协作方的最小契约；
//! - `config` / `stats` / `time` / `error`：配置、计数、时钟与错误等环境能力。
//!
//! ## 使用方式（How）
//! 1. 通过 [`ChannelPool::open`] 绑定端点并得到 [`ChannelHandle`]；
//! 2. 传输接收器收到字节后调用 [`Channel::on_packet_received`] 与 [`Channel::add_receive_window`]；
//! 3. 每个 tick 调用 [`Channel::process_packets`]，完成握手、解码、分发与发送队列冲刷；
//! 4. 连接失效时调用 [`ChannelHandle::destroy`]，最后一个句柄释放时通道回到池中。

pub mod bundle;
pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod interface;
pub mod packet;
pub mod pool;
pub mod stats;
pub mod time;
pub mod window;

pub use bundle::{Bundle, BundlePool, PooledBundle};
pub use channel::{
    Channel, ChannelBinding, ChannelHandle, ChannelId, ChannelPool, ProcessOutcome,
    ProcessReport, ProtocolClass, SendReport, Trust,
};
pub use codec::{
    AltCodec, AltProtocol, MessageReader, PacketFilter, ProtocolDecoder, RawReader,
    is_websocket_upgrade,
};
pub use config::ChannelConfig;
pub use dispatcher::{Dispatcher, PacketReceiverKind, TimerHandle, TimerToken, TimerWatch};
pub use endpoint::{Endpoint, SharedEndpoint, TransportKind};
pub use error::{ChannelError, DecodeError};
pub use handler::{MessageContext, MessageHandler, MessageHandlers, MessageId, MessageLength};
pub use interface::{NetworkInterface, WriteProgress, write_bundle};
pub use packet::{Packet, PacketBuf, PacketPool};
pub use pool::{ObjectPool, PoolStats, Pooled, Reclaim};
pub use stats::{ChannelStats, NetworkStats, NetworkStatsSnapshot};
pub use time::{Clock, MockClock, SystemClock};
pub use window::{ReceiveWindow, WindowSlot};

/// 安装 `fmt + EnvFilter` 形式的全局 tracing 订阅者。
///
/// - **契约 (What)**：`RUST_LOG` 未设置时默认 `spark_channel=info`；重复安装返回 `false`，不会 panic；
/// - **适用场景**：示例进程与本地排障。生产进程通常由宿主统一安装订阅者。
#[cfg(feature = "tracing-init")]
pub fn init_tracing() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("spark_channel=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
