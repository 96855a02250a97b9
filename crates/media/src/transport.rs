//! 点对点传输抽象
//!
//! 传输库（ICE/DTLS/SCTP）是外部协作者。它的回调运行在传输库自己的线程上，
//! 所以实现方不直接改动会话状态，而是把每个回调翻译成 [`TransportEvent`]
//! 投递到会话驱动任务的事件队列里。

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use relaycast_common::MediaConfig;
use signaling::protocol::{IceData, SignalingType};
use tokio::sync::mpsc;

/// 会话描述类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    /// 对应的信令消息类型
    pub fn signaling_type(self) -> SignalingType {
        match self {
            SdpKind::Offer => SignalingType::Offer,
            SdpKind::Answer => SignalingType::Answer,
        }
    }
}

/// 数据通道可靠性参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reliability {
    pub ordered: bool,
    /// `None` 表示完全可靠
    pub max_retransmits: Option<u16>,
}

impl Reliability {
    /// 视频用：不保序、不重传
    pub fn unreliable() -> Self {
        Self {
            ordered: false,
            max_retransmits: Some(0),
        }
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Self::unreliable()
    }
}

impl From<&MediaConfig> for Reliability {
    fn from(config: &MediaConfig) -> Self {
        Self {
            ordered: config.ordered,
            max_retransmits: Some(config.max_retransmits),
        }
    }
}

/// 传输回调事件
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// 本地会话描述已生成（发起方为 offer，应答方为 answer）
    LocalDescription { kind: SdpKind, sdp: String },
    /// 发现一个本地 ICE 候选
    LocalCandidate(IceData),
    ChannelOpen,
    ChannelClosed,
    /// 数据通道收到的二进制消息，未解析
    ChannelMessage(Bytes),
    ConnectionFailed,
}

/// 一个点对点传输对象
///
/// 方法都只需要 `&self`，实现方自行管理内部可变状态。
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// 创建数据通道并生成本地 offer
    ///
    /// offer 通过 [`TransportEvent::LocalDescription`] 送出。
    async fn create_channel(
        &self,
        label: &str,
        reliability: Reliability,
    ) -> Result<(), TransportError>;

    /// 应用远端描述
    ///
    /// 远端为 offer 时实现方必须随后生成 answer，并同样以
    /// [`TransportEvent::LocalDescription`] 送出。
    async fn set_remote_description(&self, kind: SdpKind, sdp: String)
    -> Result<(), TransportError>;

    async fn add_remote_candidate(&self, candidate: IceData) -> Result<(), TransportError>;

    /// 在数据通道上发送一条二进制消息
    async fn send(&self, data: Bytes) -> Result<(), TransportError>;

    fn is_channel_open(&self) -> bool;

    /// 释放数据通道和连接，可重复调用
    async fn close(&self);
}

/// 传输对象工厂
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// 创建一个把回调投递到 `events` 的传输对象
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, TransportError>;
}
