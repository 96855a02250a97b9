//! RFC 6184 H.264 -> RTP 风格封包（Single NAL Unit + FU-A）
//!
//! 输入不带起始码的 NAL 单元和 90 kHz 时间戳，输出一个或多个 [`FramePacket`]。
//! 序号每输出一个包（包括每个分片）加一，按 2^16 回绕；同一 NAL 单元的所有分片共享时间戳，
//! 只有最后一个包带 marker。

use crate::error::MediaError;
use crate::rtp::{FramePacket, RtpHeader};
use bytes::{BufMut, Bytes, BytesMut};
use relaycast_common::config::MediaConfig;
use relaycast_common::config::media::DEFAULT_MAX_PAYLOAD;

/// FU-A 的 NAL 类型
pub const NAL_TYPE_FU_A: u8 = 28;
/// FU 指示符 + FU 头
pub const FU_A_HEADER_LEN: usize = 2;
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

#[derive(Debug, Clone)]
pub struct H264Packetizer {
    max_payload: usize,
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    dropped: u64,
}

impl Default for H264Packetizer {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            payload_type: DEFAULT_PAYLOAD_TYPE,
            ssrc: rand::random::<u32>(),
            sequence: 0,
            dropped: 0,
        }
    }
}

impl H264Packetizer {
    /// 创建封包器，SSRC 随机选取
    pub fn new(max_payload: usize, payload_type: u8) -> Result<Self, MediaError> {
        if max_payload <= FU_A_HEADER_LEN {
            return Err(MediaError::InvalidConfig(format!(
                "max_payload {max_payload} leaves no room for FU-A fragments"
            )));
        }
        if payload_type > 0x7F {
            return Err(MediaError::InvalidConfig(format!(
                "payload_type {payload_type} does not fit in 7 bits"
            )));
        }
        Ok(Self {
            max_payload,
            payload_type,
            ..Self::default()
        })
    }

    pub fn from_config(config: &MediaConfig) -> Result<Self, MediaError> {
        Self::new(config.max_payload, config.payload_type)
    }

    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    pub fn with_sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// 下一个包将使用的序号
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// 因空输入丢弃的次数
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// 把一个 NAL 单元切成包
    ///
    /// 空 NAL 单元直接丢弃并计数，不报错。
    pub fn packetize(&mut self, nal: &[u8], timestamp: u32) -> Vec<FramePacket> {
        let Some((&nal_header, body)) = nal.split_first() else {
            self.dropped += 1;
            return Vec::new();
        };

        if nal.len() <= self.max_payload {
            let packet = self.next_packet(timestamp, true, Bytes::copy_from_slice(nal));
            return vec![packet];
        }

        let chunk_size = self.max_payload - FU_A_HEADER_LEN;
        let fu_indicator = (nal_header & 0xE0) | NAL_TYPE_FU_A;
        let nal_type = nal_header & 0x1F;

        let count = body.len().div_ceil(chunk_size);
        let mut packets = Vec::with_capacity(count);
        for (index, chunk) in body.chunks(chunk_size).enumerate() {
            let first = index == 0;
            let last = index + 1 == count;

            let mut fu_header = nal_type;
            if first {
                fu_header |= FU_START;
            }
            if last {
                fu_header |= FU_END;
            }

            let mut payload = BytesMut::with_capacity(FU_A_HEADER_LEN + chunk.len());
            payload.put_u8(fu_indicator);
            payload.put_u8(fu_header);
            payload.extend_from_slice(chunk);

            packets.push(self.next_packet(timestamp, last, payload.freeze()));
        }
        packets
    }

    fn next_packet(&mut self, timestamp: u32, marker: bool, payload: Bytes) -> FramePacket {
        let header = RtpHeader::new(self.payload_type, self.sequence, timestamp, self.ssrc)
            .with_marker(marker);
        self.sequence = self.sequence.wrapping_add(1);
        FramePacket { header, payload }
    }
}
