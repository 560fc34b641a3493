//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 区分两类失败：解码故障（[`DecodeError`]，逐连接、可预期的例行事件）与通道级失败
//!   （[`ChannelError`]，IO、配置、误用）；
//! - 解码故障以显式返回值交给处理循环做模式匹配，不依赖栈展开。
//!
//! ## 设计要求（What）
//! - 所有错误通过 `thiserror` 派生，携带稳定错误码（见 [`codes`]），供日志字段与告警聚合使用；
//! - IO 错误经由 [`OperationKind`] 表映射，保留原始 `io::Error` 作为 `source`。

use std::{borrow::Cow, io};

use thiserror::Error;

use crate::handler::MessageId;

/// 稳定错误码集合。
pub mod codes {
    pub const DECODE_MALFORMED: &str = "spark.channel.decode.malformed";
    pub const DECODE_UNKNOWN_MESSAGE: &str = "spark.channel.decode.unknown_message";
    pub const CHANNEL_DESTROYED: &str = "spark.channel.destroyed";
    pub const MESSAGE_TOO_LARGE: &str = "spark.channel.bundle.message_too_large";
    pub const LENGTH_MISMATCH: &str = "spark.channel.bundle.length_mismatch";
    pub const CONFIG_INVALID: &str = "spark.channel.config.invalid";
    pub const SEND_FAILED: &str = "spark.channel.send_failed";
    pub const SEND_WOULD_BLOCK: &str = "spark.channel.send_would_block";
    pub const FILTER_FAILED: &str = "spark.channel.filter_failed";
    pub const NO_ENDPOINT: &str = "spark.channel.no_endpoint";
}

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const SEND: OperationKind = OperationKind {
    code: codes::SEND_FAILED,
    message: "endpoint send",
};

pub(crate) const FILTER: OperationKind = OperationKind {
    code: codes::FILTER_FAILED,
    message: "packet filter",
};

/// 解码阶段的故障。
///
/// # 教案式说明
/// - **意图 (Why)**：字节流分帧一旦错位就无法安全重新同步，因此该错误只出现一种处理方式：
///   清零解码游标并判定通道失效；
/// - **契约 (What)**：`message_id` 为出错时解码器正在处理的消息号（未读出时为 0），
///   `reason` 为人类可读的定位信息。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 数据流畸形：长度越界、字段不可解析等。
    #[error("malformed stream while decoding message {message_id}: {reason}")]
    MalformedStream {
        message_id: MessageId,
        reason: Cow<'static, str>,
    },

    /// 消息号未注册处理器，分帧长度无从得知。
    #[error("no handler registered for message {message_id}")]
    UnknownMessage { message_id: MessageId },
}

impl DecodeError {
    /// 构造畸形流错误。
    pub fn malformed(message_id: MessageId, reason: impl Into<Cow<'static, str>>) -> Self {
        DecodeError::MalformedStream {
            message_id,
            reason: reason.into(),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::MalformedStream { .. } => codes::DECODE_MALFORMED,
            DecodeError::UnknownMessage { .. } => codes::DECODE_UNKNOWN_MESSAGE,
        }
    }

    /// 出错时正在解码的消息号。
    pub fn message_id(&self) -> MessageId {
        match self {
            DecodeError::MalformedStream { message_id, .. }
            | DecodeError::UnknownMessage { message_id } => *message_id,
        }
    }
}

/// 通道级错误域。
#[derive(Debug, Error)]
pub enum ChannelError {
    /// 通道已销毁，拒绝新的发送或处理请求。
    #[error("channel {label} is destroyed")]
    Destroyed { label: String },

    /// 单条消息超过分帧可表达的最大长度。
    #[error("message {message_id} carries {len} bytes, exceeding the {max} byte frame limit")]
    MessageTooLarge {
        message_id: MessageId,
        len: usize,
        max: usize,
    },

    /// 定长消息的消息体长度与声明不符。
    #[error("message {message_id} declares {expected} bytes but carries {actual}")]
    LengthMismatch {
        message_id: MessageId,
        expected: usize,
        actual: usize,
    },

    /// 通道当前未绑定端点。
    #[error("channel has no bound endpoint")]
    NoEndpoint,

    /// 底层 IO 失败。
    #[error("{message}: {source}")]
    Io {
        code: &'static str,
        message: &'static str,
        #[source]
        source: io::Error,
    },

    /// 配置文本无法解析，原始解析错误装箱保存。
    #[error("invalid channel configuration: {0}")]
    Config(#[source] Box<toml::de::Error>),
}

impl ChannelError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::Destroyed { .. } => codes::CHANNEL_DESTROYED,
            ChannelError::MessageTooLarge { .. } => codes::MESSAGE_TOO_LARGE,
            ChannelError::LengthMismatch { .. } => codes::LENGTH_MISMATCH,
            ChannelError::NoEndpoint => codes::NO_ENDPOINT,
            ChannelError::Io { code, .. } => *code,
            ChannelError::Config(_) => codes::CONFIG_INVALID,
        }
    }

    /// 是否为“暂时写不进去，稍后重试”的信号。
    pub fn is_would_block(&self) -> bool {
        matches!(self, ChannelError::Io { code, .. } if *code == codes::SEND_WOULD_BLOCK)
    }
}

/// 将 IO 错误映射为通道错误；`WouldBlock` 单独归类，便于发送路径以布尔信号上报。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> ChannelError {
    let code = match error.kind() {
        io::ErrorKind::WouldBlock => codes::SEND_WOULD_BLOCK,
        _ => kind.code,
    };
    ChannelError::Io {
        code,
        message: kind.message,
        source: error,
    }
}
