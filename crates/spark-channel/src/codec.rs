//! # 解码器与协议选择
//!
//! ## 角色定位（Why）
//! - 通道在首包到达时一次性决定解码方式：原始二进制分帧，或经文本握手升级的替代分帧协议
//!   （典型为 WebSocket）；
//! - 只存在两种形态，因此以标签联合 [`ProtocolDecoder`] 表达，替代协议的具体读取器与
//!   出站过滤器由 [`AltProtocol`] 实现方提供。
//!
//! ## 契约（What）
//! - [`MessageReader::process`] 消费包内字节并按消息号调用处理器；分帧错误以
//!   [`DecodeError`] 返回，读取器保留出错时的消息号与长度供诊断，随后由通道调用
//!   [`MessageReader::reset_cursor`] 清零；
//! - [`PacketFilter`] 只作用于出站方向，在写入端点前对每个线缆包重新封帧。

use std::{fmt, io, sync::Arc};

use bytes::BytesMut;

use crate::{
    endpoint::SharedEndpoint,
    error::DecodeError,
    handler::{MessageContext, MessageHandlers, MessageId, MessageLength},
    packet::PacketBuf,
};

/// 入站消息读取器。
pub trait MessageReader: Send {
    /// 消费 `packet` 中的字节，完整消息立即分发给处理器；不完整的尾部保留到下一个包。
    fn process(
        &mut self,
        handlers: &mut MessageHandlers,
        ctx: &mut MessageContext<'_>,
        packet: &mut PacketBuf,
    ) -> Result<(), DecodeError>;

    /// 当前正在解码的消息号。
    fn current_message_id(&self) -> MessageId;

    /// 当前正在解码的消息长度。
    fn current_message_length(&self) -> u32;

    /// 将消息号、长度与未完成的片段全部清零。
    fn reset_cursor(&mut self);
}

/// 出站过滤器：对线缆包进行替代协议的封帧。
pub trait PacketFilter: Send + Sync {
    /// 将 `payload` 封帧后追加到 `out`。
    fn encode(&self, payload: &[u8], out: &mut BytesMut) -> io::Result<()>;
}

/// 替代协议的读取器与过滤器组合。
pub struct AltCodec {
    pub reader: Box<dyn MessageReader>,
    pub filter: Arc<dyn PacketFilter>,
}

/// 替代协议的握手探测与应答。
///
/// # 教案式说明
/// - **意图 (Why)**：协议识别基于首包字节嗅探；探测与握手应答由实现方负责，
///   通道只关心“是否匹配”“握手是否成功”两个布尔结论；
/// - **契约 (What)**：
///   - `matches`：默认实现识别 HTTP `GET` 形式的 WebSocket 升级请求，见 [`is_websocket_upgrade`]；
///   - `handshake`：消费首包中的握手请求并经端点写回应答；可以把首包读空，
///     通道随后将读空的首包移出接收窗口；返回 `false` 时通道回退到原始分帧；
///   - `codec`：握手成功后调用一次，产出该连接专属的读取器与过滤器。
pub trait AltProtocol: Send + Sync {
    fn matches(&self, packet: &PacketBuf) -> bool {
        is_websocket_upgrade(packet.as_slice())
    }

    fn handshake(&self, packet: &mut PacketBuf, endpoint: Option<&SharedEndpoint>) -> bool;

    fn codec(&self) -> AltCodec;
}

/// 判断字节是否为 WebSocket 升级请求。
///
/// 请求行须为 `GET`，且任一头部满足：`Upgrade` 的值包含 `websocket`，或存在
/// `Sec-WebSocket-Key`。比较大小写不敏感；请求可能不完整，握手实现需自行校验其余字段。
pub fn is_websocket_upgrade(bytes: &[u8]) -> bool {
    if bytes.len() < 4 || !bytes[..4].eq_ignore_ascii_case(b"GET ") {
        return false;
    }
    bytes.split(|byte| *byte == b'\n').skip(1).any(|line| {
        let line = line.trim_ascii();
        if let Some(value) = header_value(line, b"upgrade:") {
            return value
                .windows(b"websocket".len())
                .any(|window| window.eq_ignore_ascii_case(b"websocket"));
        }
        header_value(line, b"sec-websocket-key:").is_some()
    })
}

fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    (line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name))
        .then(|| line[name.len()..].trim_ascii())
}

/// 握手后安装的解码器。
pub enum ProtocolDecoder {
    /// 原始二进制分帧。
    Raw(RawReader),
    /// 替代协议分帧。
    Alt(Box<dyn MessageReader>),
}

impl ProtocolDecoder {
    pub fn reader(&self) -> &dyn MessageReader {
        match self {
            ProtocolDecoder::Raw(reader) => reader,
            ProtocolDecoder::Alt(reader) => reader.as_ref(),
        }
    }

    pub fn reader_mut(&mut self) -> &mut dyn MessageReader {
        match self {
            ProtocolDecoder::Raw(reader) => reader,
            ProtocolDecoder::Alt(reader) => reader.as_mut(),
        }
    }

    pub fn is_alt(&self) -> bool {
        matches!(self, ProtocolDecoder::Alt(_))
    }
}

impl fmt::Debug for ProtocolDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolDecoder::Raw(reader) => f.debug_tuple("Raw").field(reader).finish(),
            ProtocolDecoder::Alt(reader) => f
                .debug_struct("Alt")
                .field("message_id", &reader.current_message_id())
                .field("message_length", &reader.current_message_length())
                .finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Stage {
    #[default]
    Id,
    Length,
    Body,
}

/// 原始二进制分帧读取器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 解析内部服务与原生客户端使用的紧凑分帧：`u16 LE` 消息号，变长消息再跟 `u16 LE` 长度，
///   随后是消息体；
/// - 一条消息可能跨越多个物理包，读取器需在包之间保留半截字段。
///
/// ## 逻辑 (How)
/// - 三段式状态机 `Id → Length → Body`，每段所需字节先累积到 `fragment`，凑齐后推进；
/// - 消息号查不到处理器即判定为畸形流：分帧长度无从得知，后续字节无法对齐；
/// - 变长消息长度超过 `max_message_length` 同样判定为畸形流。
///
/// ## 契约 (What)
/// - 出错时 `current_message_id`/`current_message_length` 保持出错位置的值，
///   由调用方诊断后调用 `reset_cursor`。
#[derive(Debug)]
pub struct RawReader {
    message_id: MessageId,
    message_length: u32,
    fragment: BytesMut,
    stage: Stage,
    max_message_length: u32,
}

impl RawReader {
    pub fn new() -> Self {
        Self::with_max_message_length(u32::from(u16::MAX))
    }

    /// 限制变长消息的最大长度。
    pub fn with_max_message_length(max_message_length: u32) -> Self {
        Self {
            message_id: 0,
            message_length: 0,
            fragment: BytesMut::new(),
            stage: Stage::Id,
            max_message_length,
        }
    }

    /// 把 `fragment` 补齐到 `need` 字节，返回是否已凑齐。
    fn fill(&mut self, packet: &mut PacketBuf, need: usize) -> bool {
        let missing = need.saturating_sub(self.fragment.len());
        let available = packet.length().min(missing);
        self.fragment
            .extend_from_slice(&packet.as_slice()[..available]);
        packet.advance(available);
        self.fragment.len() >= need
    }

    fn take_u16(&mut self) -> u16 {
        let value = u16::from_le_bytes([self.fragment[0], self.fragment[1]]);
        self.fragment.clear();
        value
    }
}

impl Default for RawReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageReader for RawReader {
    fn process(
        &mut self,
        handlers: &mut MessageHandlers,
        ctx: &mut MessageContext<'_>,
        packet: &mut PacketBuf,
    ) -> Result<(), DecodeError> {
        loop {
            match self.stage {
                Stage::Id => {
                    if !self.fill(packet, 2) {
                        return Ok(());
                    }
                    self.message_id = self.take_u16();
                    let Some(handler) = handlers.lookup(self.message_id) else {
                        return Err(DecodeError::UnknownMessage {
                            message_id: self.message_id,
                        });
                    };
                    match handler.length() {
                        MessageLength::Fixed(len) => {
                            self.message_length = u32::from(len);
                            self.stage = Stage::Body;
                        }
                        MessageLength::Variable => self.stage = Stage::Length,
                    }
                }
                Stage::Length => {
                    if !self.fill(packet, 2) {
                        return Ok(());
                    }
                    self.message_length = u32::from(self.take_u16());
                    if self.message_length > self.max_message_length {
                        return Err(DecodeError::malformed(
                            self.message_id,
                            format!(
                                "message length {} exceeds limit {}",
                                self.message_length, self.max_message_length
                            ),
                        ));
                    }
                    self.stage = Stage::Body;
                }
                Stage::Body => {
                    if !self.fill(packet, self.message_length as usize) {
                        return Ok(());
                    }
                    let body = self.fragment.split();
                    if let Some(handler) = handlers.lookup_mut(self.message_id) {
                        handler.invoke(ctx, &body);
                    }
                    self.message_id = 0;
                    self.message_length = 0;
                    self.stage = Stage::Id;
                    if packet.is_consumed() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn current_message_id(&self) -> MessageId {
        self.message_id
    }

    fn current_message_length(&self) -> u32 {
        self.message_length
    }

    fn reset_cursor(&mut self) {
        self.message_id = 0;
        self.message_length = 0;
        self.fragment.clear();
        self.stage = Stage::Id;
    }
}
