//! 消息处理表。
//!
//! 消息号到处理器的映射由应用层填充；解码器按消息号查表决定分帧长度并调用回调，
//! 通道在解码故障时查表只为诊断日志取名称与声明长度。

use std::{borrow::Cow, collections::HashMap, fmt, net::SocketAddr};

use crate::{bundle::PooledBundle, channel::ChannelId};

/// 消息号。
pub type MessageId = u16;

/// 消息的声明长度。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageLength {
    /// 定长消息，消息体固定为给定字节数。
    Fixed(u16),
    /// 变长消息，消息号后紧跟 `u16 LE` 长度。
    Variable,
}

impl MessageLength {
    /// 诊断用的声明长度，变长消息记为 -1。
    pub fn declared(&self) -> i32 {
        match self {
            MessageLength::Fixed(len) => i32::from(*len),
            MessageLength::Variable => -1,
        }
    }
}

/// 处理器回调可见的分发上下文。
///
/// 回调不能直接访问正在处理的通道；需要回包时通过 [`MessageContext::reply`] 入队，
/// 通道在本轮解码结束后统一冲刷。
pub struct MessageContext<'a> {
    channel_id: ChannelId,
    peer: Option<SocketAddr>,
    replies: &'a mut Vec<PooledBundle>,
}

impl<'a> MessageContext<'a> {
    pub fn new(
        channel_id: ChannelId,
        peer: Option<SocketAddr>,
        replies: &'a mut Vec<PooledBundle>,
    ) -> Self {
        Self {
            channel_id,
            peer,
            replies,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// 将回包追加到通道的发送队列。
    pub fn reply(&mut self, bundle: PooledBundle) {
        self.replies.push(bundle);
    }
}

type Callback = Box<dyn FnMut(&mut MessageContext<'_>, &[u8]) + Send>;

/// 单条消息的处理器。
pub struct MessageHandler {
    name: Cow<'static, str>,
    length: MessageLength,
    callback: Callback,
}

impl MessageHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> MessageLength {
        self.length
    }

    /// 以消息体调用回调。
    pub fn invoke(&mut self, ctx: &mut MessageContext<'_>, body: &[u8]) {
        (self.callback)(ctx, body);
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandler")
            .field("name", &self.name)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// 消息号到处理器的映射表。
#[derive(Debug, Default)]
pub struct MessageHandlers {
    handlers: HashMap<MessageId, MessageHandler>,
}

impl MessageHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，返回被替换的旧处理器。
    pub fn register(
        &mut self,
        id: MessageId,
        name: impl Into<Cow<'static, str>>,
        length: MessageLength,
        callback: impl FnMut(&mut MessageContext<'_>, &[u8]) + Send + 'static,
    ) -> Option<MessageHandler> {
        self.handlers.insert(
            id,
            MessageHandler {
                name: name.into(),
                length,
                callback: Box::new(callback),
            },
        )
    }

    pub fn lookup(&self, id: MessageId) -> Option<&MessageHandler> {
        self.handlers.get(&id)
    }

    pub fn lookup_mut(&mut self, id: MessageId) -> Option<&mut MessageHandler> {
        self.handlers.get_mut(&id)
    }

    /// 诊断描述：`(名称, 声明长度)`，未注册时为 `("unknown", -1)`。
    pub fn describe(&self, id: MessageId) -> (&str, i32) {
        match self.lookup(id) {
            Some(handler) => (handler.name(), handler.length().declared()),
            None => ("unknown", -1),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
