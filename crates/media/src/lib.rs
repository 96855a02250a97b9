//! H.264 over DataChannel
//!
//! # 模块结构
//!
//! ## 封包
//! - [`rtp`]: 12 字节 RTP 风格包头
//! - [`packetizer`]: NAL 单元 -> 包（单包或 FU-A 分片）
//! - [`depacketizer`]: 包 -> NAL 单元
//! - [`annexb`]: Annex-B 字节流切分
//!
//! ## 会话
//! - [`transport`]: 传输抽象与回调事件
//! - [`webrtc_transport`]: webrtc-rs 实现
//! - [`session`]: 点对点会话状态机

pub mod annexb;
pub mod depacketizer;
pub mod error;
pub mod packetizer;
pub mod rtp;
pub mod session;
pub mod stats;
pub mod transport;
pub mod webrtc_transport;

pub use depacketizer::H264Depacketizer;
pub use error::{MediaError, TransportError};
pub use packetizer::H264Packetizer;
pub use rtp::{FramePacket, RtpHeader};
pub use session::{PeerSession, SessionState};
pub use stats::{MediaStats, MediaStatsSnapshot};
pub use transport::{PeerTransport, Reliability, SdpKind, TransportEvent, TransportFactory};
pub use webrtc_transport::{WebRtcTransport, WebRtcTransportFactory};
