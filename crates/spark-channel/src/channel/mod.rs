//! # 通道状态机
//!
//! ## 角色定位（Why）
//! - [`Channel`] 承载一条对端连接的全部可变状态：端点绑定、协议识别、双缓冲接收窗口、
//!   发送队列、空闲检测以及“失效 → 销毁”的单向状态机；
//! - 所有方法都在所属分发线程上以 `&mut self` 同步执行，不阻塞、不挂起。
//!
//! ## 生命周期（How）
//! - 通道对象由 [`ChannelPool`] 租借，经 [`ChannelPool::open`] 绑定端点后包装成
//!   [`ChannelHandle`]；句柄克隆即增加引用，丢弃即减少引用；
//! - [`ChannelHandle::destroy`] 注销可读事件、关闭端点、停止空闲检测并消费调用方的句柄；
//! - 最后一个句柄释放时，`Drop` 钩子完成最终销毁，对象以全新的未绑定状态回到池中。
//!
//! ## 契约（What）
//! - `destroyed` 单调：一旦为真不再复位，注销与关闭只发生一次；
//! - `condemned` 单调：判定失效后只能等待外部销毁，`clear_state` 也不会撤销；
//! - 任意时刻至多持有一个端点，替换时先释放旧端点。

mod handle;
mod inactivity;
mod receive;
mod send;

pub use handle::{ChannelHandle, ChannelPool};
pub use receive::{ProcessOutcome, ProcessReport};
pub use send::SendReport;

use std::{
    collections::VecDeque,
    fmt, mem,
    net::SocketAddr,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use tracing::{error, warn};

use crate::{
    bundle::PooledBundle,
    codec::{AltProtocol, PacketFilter, ProtocolDecoder},
    config::ChannelConfig,
    dispatcher::{PacketReceiverKind, TimerHandle},
    endpoint::{SharedEndpoint, TransportKind, same_endpoint},
    handler::MessageHandlers,
    interface::{NetworkInterface, WriteProgress},
    pool::Reclaim,
    stats::ChannelStats,
    time::Clock,
    window::ReceiveWindow,
};

/// 通道标识。
pub type ChannelId = u32;

/// 对端信任等级。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trust {
    /// 协作的内部服务：溢出只告警。
    Internal,
    /// 不受信任的客户端：溢出即判定失效。
    External,
}

/// 协议识别结果。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProtocolClass {
    /// 尚未握手。
    #[default]
    Undetermined,
    /// 原始二进制分帧。
    Raw,
    /// 首包匹配替代协议签名。
    AltFramed,
}

/// 绑定通道所需的参数。
pub struct ChannelBinding {
    pub id: ChannelId,
    pub transport: TransportKind,
    pub trust: Trust,
    pub endpoint: SharedEndpoint,
    /// 握手前即生效的出站过滤器。
    pub filter: Option<Arc<dyn PacketFilter>>,
    /// 首包探测使用的替代协议；缺省时一律按原始分帧处理。
    pub alt_protocol: Option<Arc<dyn AltProtocol>>,
}

impl ChannelBinding {
    pub fn new(
        id: ChannelId,
        transport: TransportKind,
        trust: Trust,
        endpoint: SharedEndpoint,
    ) -> Self {
        Self {
            id,
            transport,
            trust,
            endpoint,
            filter: None,
            alt_protocol: None,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn PacketFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_alt_protocol(mut self, alt_protocol: Arc<dyn AltProtocol>) -> Self {
        self.alt_protocol = Some(alt_protocol);
        self
    }
}

/// 单条对端连接。
pub struct Channel {
    interface: Option<Weak<dyn NetworkInterface>>,
    config: Arc<ChannelConfig>,
    clock: Arc<dyn Clock>,

    id: ChannelId,
    transport: TransportKind,
    trust: Trust,
    protocol: ProtocolClass,
    proxy_id: u64,
    component_id: u64,
    extra: String,

    condemned: bool,
    destroyed: bool,

    last_received: Instant,
    inactivity_period: Option<Duration>,
    inactivity_timer: TimerHandle,
    stats: ChannelStats,

    endpoint: Option<SharedEndpoint>,
    receiver: Option<PacketReceiverKind>,
    registered: bool,

    decoder: Option<ProtocolDecoder>,
    filter: Option<Arc<dyn PacketFilter>>,
    alt_protocol: Option<Arc<dyn AltProtocol>>,
    handlers: Option<MessageHandlers>,

    bundles: VecDeque<PooledBundle>,
    send_progress: WriteProgress,
    window: ReceiveWindow,
}

impl Channel {
    /// 创建未绑定的占位通道，稍后经 [`Channel::reset`] 或池的 `open` 绑定。
    pub fn unbound(config: Arc<ChannelConfig>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            interface: None,
            config,
            clock,
            id: 0,
            transport: TransportKind::Stream,
            trust: Trust::External,
            protocol: ProtocolClass::Undetermined,
            proxy_id: 0,
            component_id: 0,
            extra: String::new(),
            condemned: false,
            destroyed: false,
            last_received: now,
            inactivity_period: None,
            inactivity_timer: TimerHandle::default(),
            stats: ChannelStats::default(),
            endpoint: None,
            receiver: None,
            registered: false,
            decoder: None,
            filter: None,
            alt_protocol: None,
            handlers: None,
            bundles: VecDeque::new(),
            send_progress: WriteProgress::default(),
            window: ReceiveWindow::new(),
        }
    }

    /// 创建并立即绑定端点的通道。
    ///
    /// 字节流端点向分发器注册可读事件；数据报端点由监听套接字分拣，不单独注册。
    /// 随后按信任等级启动空闲检测。
    pub fn new(
        interface: &Arc<dyn NetworkInterface>,
        config: Arc<ChannelConfig>,
        clock: Arc<dyn Clock>,
        binding: ChannelBinding,
    ) -> Self {
        let mut channel = Self::unbound(config, clock);
        channel.bind(interface, binding);
        channel
    }

    pub(crate) fn bind(&mut self, interface: &Arc<dyn NetworkInterface>, binding: ChannelBinding) {
        self.interface = Some(Arc::downgrade(interface));
        self.id = binding.id;
        self.transport = binding.transport;
        self.trust = binding.trust;
        self.filter = binding.filter;
        self.alt_protocol = binding.alt_protocol;
        self.receiver = Some(match binding.transport {
            TransportKind::Stream => PacketReceiverKind::Stream,
            TransportKind::Datagram => PacketReceiverKind::Datagram,
        });
        self.set_endpoint(Some(binding.endpoint));
        self.register_endpoint();
        self.restart_inactivity_detection();
    }

    /// 替换端点；与当前端点为同一对象时不做任何事。
    ///
    /// 旧端点若已注册可读事件，先注销再释放；新端点的注册由调用方决定。
    pub fn set_endpoint(&mut self, endpoint: Option<SharedEndpoint>) {
        if same_endpoint(self.endpoint.as_ref(), endpoint.as_ref()) {
            return;
        }
        if self.registered {
            if let (Some(interface), Some(old)) = (self.interface(), self.endpoint.as_ref()) {
                interface.dispatcher().deregister_readable(old);
            }
            self.registered = false;
        }
        drop(self.endpoint.take());
        self.endpoint = endpoint;
        self.last_received = self.clock.now();
    }

    /// 完整的重新绑定。
    ///
    /// # 教案式说明
    /// - **前置条件**：新端点与当前端点相同则直接返回；
    /// - **执行步骤**：
    ///   1. 若网络接口登记了延迟发送，先用旧端点冲刷发送队列，避免批次指向即将被替换的端点；
    ///   2. `clear_state(warn_on_discard)` 释放缓冲包、发送队列、解码器与过滤器；
    ///   3. 绑定新端点，字节流端点重新注册可读事件，并重启空闲检测。
    pub fn reset(&mut self, endpoint: Option<SharedEndpoint>, warn_on_discard: bool) {
        if same_endpoint(self.endpoint.as_ref(), endpoint.as_ref()) {
            return;
        }
        if let Some(interface) = self.interface()
            && interface.take_delayed(self.id)
        {
            self.send(None);
        }
        self.clear_state(warn_on_discard);
        self.set_endpoint(endpoint);
        self.register_endpoint();
        self.restart_inactivity_detection();
    }

    /// 复位全部连接相关状态。
    ///
    /// 缓冲包与发送队列全部归还到各自的池，半途批次的写出游标随之清零；
    /// `warn_on_discard` 为真且其中有未读数据时告警。
    /// 失效与销毁标记不在复位范围内，专属处理表同样保留。
    pub fn clear_state(&mut self, warn_on_discard: bool) {
        let discarded = self.window.clear();
        if discarded > 0 && warn_on_discard {
            warn!(
                channel = %self.label(),
                discarded,
                "discarding buffered packets while clearing channel state"
            );
        }
        self.discard_bundles();
        self.last_received = self.clock.now();
        self.stats = ChannelStats::default();
        self.proxy_id = 0;
        self.extra.clear();
        self.protocol = ProtocolClass::Undetermined;
        self.decoder = None;
        self.filter = None;
        self.stop_inactivity_detection();
        self.set_endpoint(None);
    }

    /// 销毁通道：通知网络接口、注销可读事件、关闭字节流端点并停止空闲检测。
    ///
    /// 重复调用记录一条严重错误并直接返回。
    pub fn destroy(&mut self) {
        if self.destroyed {
            error!(
                channel = %self.label(),
                critical = true,
                "channel destroyed twice"
            );
            return;
        }
        self.release_endpoint();
        self.stop_inactivity_detection();
        self.destroyed = true;
    }

    /// 判定通道失效；只置位并记录，不停止处理也不销毁。
    pub fn condemn(&mut self) {
        self.condemned = true;
        error!(channel = %self.label(), "channel condemned");
    }

    /// 诊断标签：`地址/标识/失效/死亡`，未绑定时地址为 `None`。
    pub fn label(&self) -> String {
        let addr = match self.peer_addr() {
            Some(addr) => addr.to_string(),
            None => "None".to_owned(),
        };
        format!(
            "{addr}/{}/{}/{}",
            self.id,
            u8::from(self.condemned),
            u8::from(self.is_dead())
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn trust(&self) -> Trust {
        self.trust
    }

    pub fn is_internal(&self) -> bool {
        self.trust == Trust::Internal
    }

    pub fn is_external(&self) -> bool {
        self.trust == Trust::External
    }

    pub fn protocol(&self) -> ProtocolClass {
        self.protocol
    }

    pub fn is_condemned(&self) -> bool {
        self.condemned
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// 已销毁或已判定失效。
    pub fn is_dead(&self) -> bool {
        self.destroyed || self.condemned
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    pub fn endpoint(&self) -> Option<&SharedEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.endpoint.as_ref().and_then(|endpoint| endpoint.peer_addr())
    }

    /// 端点的无阻塞可写探测；未绑定端点时为 `false`。
    pub fn wait_send(&self) -> bool {
        self.endpoint
            .as_ref()
            .is_some_and(|endpoint| endpoint.wait_send())
    }

    /// 绑定时确定的接收器形态。
    pub fn receiver_kind(&self) -> Option<PacketReceiverKind> {
        self.receiver
    }

    /// 端点是否在分发器上注册了可读事件。
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn decoder(&self) -> Option<&ProtocolDecoder> {
        self.decoder.as_ref()
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn proxy_id(&self) -> u64 {
        self.proxy_id
    }

    pub fn set_proxy_id(&mut self, proxy_id: u64) {
        self.proxy_id = proxy_id;
    }

    pub fn component_id(&self) -> u64 {
        self.component_id
    }

    pub fn set_component_id(&mut self, component_id: u64) {
        self.component_id = component_id;
    }

    /// 自由格式的会话标签。
    pub fn extra(&self) -> &str {
        &self.extra
    }

    pub fn set_extra(&mut self, extra: impl Into<String>) {
        self.extra = extra.into();
    }

    /// 安装专属处理表，`process_packets` 时优先于调用方传入的表。
    pub fn set_message_handlers(
        &mut self,
        handlers: Option<MessageHandlers>,
    ) -> Option<MessageHandlers> {
        mem::replace(&mut self.handlers, handlers)
    }

    /// 接收窗口中尚未处理的包数量。
    pub fn buffered_packets(&self) -> usize {
        self.window.len()
    }

    /// 发送队列中的批次数量。
    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn interface(&self) -> Option<Arc<dyn NetworkInterface>> {
        self.interface.as_ref().and_then(Weak::upgrade)
    }

    /// 字节流端点注册可读事件；已销毁的通道不再注册。
    fn register_endpoint(&mut self) {
        if self.destroyed || self.registered || self.transport != TransportKind::Stream {
            return;
        }
        let (Some(interface), Some(endpoint)) = (self.interface(), self.endpoint.as_ref()) else {
            return;
        };
        self.registered =
            interface
                .dispatcher()
                .register_readable(endpoint, self.id, PacketReceiverKind::Stream);
    }

    /// 销毁路径上的端点收尾：通知、注销、关闭。端点本身保留到 `clear_state`，供诊断标签使用。
    fn release_endpoint(&mut self) {
        let (Some(interface), Some(endpoint)) = (self.interface(), self.endpoint.clone()) else {
            return;
        };
        interface.on_channel_gone(self.id, endpoint.peer_addr());
        if self.registered {
            interface.dispatcher().deregister_readable(&endpoint);
            self.registered = false;
        }
        if self.transport == TransportKind::Stream {
            endpoint.close();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.destroyed {
            self.release_endpoint();
        }
        self.clear_state(false);
    }
}

impl Reclaim for Channel {
    /// 以全新的未绑定通道替换自身；旧值的 `Drop` 完成最终销毁。
    fn reclaim(&mut self) {
        let fresh = Channel::unbound(Arc::clone(&self.config), Arc::clone(&self.clock));
        drop(mem::replace(self, fresh));
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.label())
            .field("transport", &self.transport)
            .field("trust", &self.trust)
            .field("protocol", &self.protocol)
            .field("buffered", &self.window.len())
            .field("bundles", &self.bundles.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
