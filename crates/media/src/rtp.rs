//! RTP 风格包头
//!
//! 12 字节大端固定头：
//!
//! ```text
//! byte0      = 0x80 (V=2, P=0, X=0, CC=0)
//! byte1      = M(1) | PT(7)
//! byte2..4   = sequence number
//! byte4..8   = timestamp (90 kHz)
//! byte8..12  = SSRC
//! ```

use crate::error::MediaError;
use bytes::{BufMut, Bytes, BytesMut};

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_LEN: usize = 12;

/// 包头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
        }
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }
}

/// 一个可独立发送的媒体包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl FramePacket {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + self.payload.len());
        self.header.write_to(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// 解析收到的包
    ///
    /// 兼容携带 CSRC、扩展头和填充的标准 RTP 包。
    pub fn decode(data: &[u8]) -> Result<Self, MediaError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(MediaError::PacketTooShort { len: data.len() });
        }

        let b0 = data[0];
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(MediaError::UnsupportedVersion(version));
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let header = RtpHeader {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        };

        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        if extension {
            if data.len() < offset + 4 {
                return Err(MediaError::Malformed("truncated header extension"));
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
        }

        let mut end = data.len();
        if padding {
            let pad = *data.last().unwrap_or(&0) as usize;
            if pad == 0 || pad > end.saturating_sub(offset) {
                return Err(MediaError::Malformed("invalid padding length"));
            }
            end -= pad;
        }

        if offset > end {
            return Err(MediaError::Malformed("header exceeds packet length"));
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&data[offset..end]),
        })
    }
}
