//! 集成测试共享的协作方替身。
//!
//! - [`RecordingDispatcher`]：记录注册、注销与定时器；
//! - [`RecordingInterface`]：记录通道消失、超时与延迟发送登记，持有进程级计数；
//! - [`MemoryEndpoint`]：把写入的字节保存在内存中，可注入写入失败；
//! - [`ScriptedAlt`]：以 WebSocket 升级请求为签名的替代协议，握手结果可脚本化。

#![allow(dead_code)]

use std::{
    collections::HashSet,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use parking_lot::Mutex;
use spark_channel::{
    AltCodec, AltProtocol, BundlePool, ChannelBinding, ChannelConfig, ChannelHandle, ChannelId,
    ChannelPool, DecodeError, Dispatcher, Endpoint, MessageContext, MessageHandlers, MessageId,
    MessageLength, MessageReader, MockClock, NetworkInterface, NetworkStats, Packet, PacketBuf,
    PacketFilter, PacketPool, PacketReceiverKind, PooledBundle, SharedEndpoint, TimerHandle,
    TimerToken, TimerWatch, TransportKind, Trust,
};

pub const PEER: &str = "10.0.0.7:20013";

#[derive(Default)]
pub struct RecordingDispatcher {
    pub registered: Mutex<Vec<(ChannelId, PacketReceiverKind)>>,
    pub deregistered: AtomicUsize,
    pub timers: Mutex<Vec<(Duration, ChannelId, TimerToken, TimerWatch)>>,
}

impl RecordingDispatcher {
    pub fn deregistrations(&self) -> usize {
        self.deregistered.load(Ordering::SeqCst)
    }

    /// 仍处于活动状态的定时器数量。
    pub fn active_timers(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|(.., watch)| !watch.is_cancelled())
            .count()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn register_readable(
        &self,
        _endpoint: &SharedEndpoint,
        channel: ChannelId,
        receiver: PacketReceiverKind,
    ) -> bool {
        self.registered.lock().push((channel, receiver));
        true
    }

    fn deregister_readable(&self, _endpoint: &SharedEndpoint) -> bool {
        self.deregistered.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn add_timer(&self, interval: Duration, channel: ChannelId, token: TimerToken) -> TimerHandle {
        let (handle, watch) = TimerHandle::issue();
        self.timers.lock().push((interval, channel, token, watch));
        handle
    }
}

#[derive(Default)]
pub struct RecordingInterface {
    pub dispatcher: RecordingDispatcher,
    pub stats: NetworkStats,
    pub gone: Mutex<Vec<(ChannelId, Option<SocketAddr>)>>,
    pub timeouts: Mutex<Vec<ChannelId>>,
    pub delayed: Mutex<HashSet<ChannelId>>,
}

impl NetworkInterface for RecordingInterface {
    fn dispatcher(&self) -> &dyn Dispatcher {
        &self.dispatcher
    }

    fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    fn on_channel_gone(&self, channel: ChannelId, peer: Option<SocketAddr>) {
        self.gone.lock().push((channel, peer));
    }

    fn on_channel_timeout(&self, channel: ChannelId) {
        self.timeouts.lock().push(channel);
    }

    fn delayed_send(&self, channel: ChannelId) {
        self.delayed.lock().insert(channel);
    }

    fn take_delayed(&self, channel: ChannelId) -> bool {
        self.delayed.lock().remove(&channel)
    }
}

#[derive(Debug)]
pub struct MemoryEndpoint {
    addr: Option<SocketAddr>,
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub closes: AtomicUsize,
    /// 第 N 次写入（从 0 计）起返回该错误。
    pub fail_from: Mutex<Option<(usize, io::ErrorKind)>>,
    /// 单次写入最多接受的字节数。
    pub write_limit: Mutex<Option<usize>>,
    pub writable: bool,
}

impl MemoryEndpoint {
    pub fn new(addr: &str) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.parse().ok(),
            writes: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            fail_from: Mutex::new(None),
            write_limit: Mutex::new(None),
            writable: true,
        })
    }

    pub fn fail_from(&self, write_index: usize, kind: io::ErrorKind) {
        *self.fail_from.lock() = Some((write_index, kind));
    }

    /// 撤销注入的写入失败。
    pub fn recover(&self) {
        *self.fail_from.lock() = None;
    }

    pub fn limit_writes(&self, max: usize) {
        *self.write_limit.lock() = Some(max);
    }

    pub fn written(&self) -> Vec<u8> {
        self.writes.lock().concat()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Endpoint for MemoryEndpoint {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        let mut writes = self.writes.lock();
        if let Some((index, kind)) = *self.fail_from.lock()
            && writes.len() >= index
        {
            return Err(io::Error::from(kind));
        }
        let accepted = match *self.write_limit.lock() {
            Some(max) => bytes.len().min(max),
            None => bytes.len(),
        };
        writes.push(bytes[..accepted].to_vec());
        Ok(accepted)
    }

    fn wait_send(&self) -> bool {
        self.writable
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// 替代协议读取器：每个包整体作为消息 1 的消息体。
struct WholePacketReader {
    current: MessageId,
}

impl MessageReader for WholePacketReader {
    fn process(
        &mut self,
        handlers: &mut MessageHandlers,
        ctx: &mut MessageContext<'_>,
        packet: &mut PacketBuf,
    ) -> Result<(), DecodeError> {
        self.current = 1;
        let Some(handler) = handlers.lookup_mut(1) else {
            return Err(DecodeError::UnknownMessage { message_id: 1 });
        };
        let body = packet.as_slice().to_vec();
        packet.consume_all();
        handler.invoke(ctx, &body);
        self.current = 0;
        Ok(())
    }

    fn current_message_id(&self) -> MessageId {
        self.current
    }

    fn current_message_length(&self) -> u32 {
        0
    }

    fn reset_cursor(&mut self) {
        self.current = 0;
    }
}

/// 出站过滤器：每个线缆包前加 `0x82, len`。
pub struct FramePrefix;

impl PacketFilter for FramePrefix {
    fn encode(&self, payload: &[u8], out: &mut BytesMut) -> io::Result<()> {
        out.extend_from_slice(&[0x82, payload.len() as u8]);
        out.extend_from_slice(payload);
        Ok(())
    }
}

pub const UPGRADE_REQUEST: &[u8] =
    b"GET /game HTTP/1.1\r\nHost: game\r\nUpgrade: websocket\r\nSec-WebSocket-Key: x3JJHMbDL1EzLkh9GBhXDw==\r\n\r\n";

pub const UPGRADE_RESPONSE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\r\n";

/// 脚本化的替代协议。
pub struct ScriptedAlt {
    pub accept: bool,
    pub handshakes: AtomicUsize,
}

impl ScriptedAlt {
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            handshakes: AtomicUsize::new(0),
        })
    }
}

impl AltProtocol for ScriptedAlt {
    fn handshake(&self, packet: &mut PacketBuf, endpoint: Option<&SharedEndpoint>) -> bool {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return false;
        }
        // 只读走 HTTP 请求本身，紧随其后的帧字节留给替代协议读取器。
        let request_len = packet
            .as_slice()
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map_or(packet.length(), |at| at + 4);
        packet.advance(request_len);
        if let Some(endpoint) = endpoint {
            let _ = endpoint.send(UPGRADE_RESPONSE);
        }
        true
    }

    fn codec(&self) -> AltCodec {
        AltCodec {
            reader: Box::new(WholePacketReader { current: 0 }),
            filter: Arc::new(FramePrefix),
        }
    }
}

/// 记录所有被调用消息的处理表：消息 1 定长 2 字节，消息 2 变长。
pub fn recording_handlers() -> (MessageHandlers, Arc<Mutex<Vec<(MessageId, Vec<u8>)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut handlers = MessageHandlers::new();
    let fixed = Arc::clone(&seen);
    handlers.register(1, "move", MessageLength::Fixed(2), move |_, body| {
        fixed.lock().push((1, body.to_vec()));
    });
    let variable = Arc::clone(&seen);
    handlers.register(2, "chat", MessageLength::Variable, move |_, body| {
        variable.lock().push((2, body.to_vec()));
    });
    (handlers, seen)
}

/// 消息 1 的原始分帧编码。
pub fn move_message(a: u8, b: u8) -> Vec<u8> {
    vec![1, 0, a, b]
}

/// 测试夹具：网络接口、虚拟时钟与各类对象池。
pub struct Harness {
    pub interface: Arc<RecordingInterface>,
    pub clock: MockClock,
    pub channels: ChannelPool,
    pub packets: PacketPool,
    pub bundles: BundlePool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        let clock = MockClock::new();
        Self {
            interface: Arc::new(RecordingInterface::default()),
            channels: ChannelPool::new(Arc::new(config), Arc::new(clock.clone())),
            clock,
            packets: PacketPool::packets(),
            bundles: BundlePool::bundles(),
        }
    }

    pub fn shared_interface(&self) -> Arc<dyn NetworkInterface> {
        self.interface.clone()
    }

    pub fn open(
        &self,
        id: ChannelId,
        transport: TransportKind,
        trust: Trust,
    ) -> (ChannelHandle, Arc<MemoryEndpoint>) {
        let endpoint = MemoryEndpoint::new(PEER);
        let binding = ChannelBinding::new(id, transport, trust, endpoint.clone());
        (self.open_with(binding), endpoint)
    }

    pub fn open_with(&self, binding: ChannelBinding) -> ChannelHandle {
        self.channels.open(&self.shared_interface(), binding)
    }

    pub fn packet(&self, bytes: &[u8]) -> Packet {
        self.packets.packet(TransportKind::Stream, bytes)
    }

    /// 一个恰好 `size` 字节、以 `fill` 填充的批次。
    pub fn bundle_of(&self, size: usize, fill: u8) -> PooledBundle {
        let mut bundle = self.bundles.acquire();
        bundle.push_packet(&vec![fill; size]);
        bundle
    }
}
