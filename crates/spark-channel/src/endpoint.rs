//! 端点（套接字）契约。
//!
//! 套接字的建立、读写系统调用与地址表示均由外部实现；通道只依赖本模块的最小接口，
//! 并以 `Arc` 指针身份判定“是否同一个端点”。

use std::{fmt, io, net::SocketAddr, sync::Arc};

/// 传输类型：字节流（TCP 类）或数据报（UDP 类）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Stream,
    Datagram,
}

/// 通道持有的底层端点。
///
/// # 契约说明（What）
/// - 全部方法均为非阻塞：`send` 在内核缓冲区满时返回 `ErrorKind::WouldBlock`；
/// - `wait_send` 是无阻塞的可写探测，返回 `true` 表示可以立即写入；
/// - `close` 需幂等；端点对象被丢弃时应自行释放底层句柄。
pub trait Endpoint: Send + Sync + fmt::Debug {
    /// 对端地址；未连接或地址未知时为 `None`。
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// 写入一段字节，返回实际写入的长度。
    fn send(&self, bytes: &[u8]) -> io::Result<usize>;

    /// 可写探测。
    fn wait_send(&self) -> bool;

    /// 关闭端点。
    fn close(&self);
}

/// 通道独占持有的端点句柄。
pub type SharedEndpoint = Arc<dyn Endpoint>;

/// 以指针身份比较两个可选端点。
pub(crate) fn same_endpoint(a: Option<&SharedEndpoint>, b: Option<&SharedEndpoint>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
        _ => false,
    }
}
