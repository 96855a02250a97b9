//! 媒体层错误类型

use thiserror::Error;

/// 封包 / 解包错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Invalid media configuration: {0}")]
    InvalidConfig(String),

    #[error("Packet too short: {len} bytes")]
    PacketTooShort { len: usize },

    #[error("Unsupported RTP version: {0}")]
    UnsupportedVersion(u8),

    #[error("Malformed packet: {0}")]
    Malformed(&'static str),
}

/// 传输层错误
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Data channel is not open")]
    ChannelNotOpen,

    #[error("Transport is closed")]
    Closed,

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),
}
