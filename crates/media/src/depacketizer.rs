//! RFC 6184 RTP 风格包 -> H.264 NAL 单元（Single NAL Unit + FU-A）
//!
//! 数据通道不保序也不重传，所以没有重排缓冲：分片序号不连续、时间戳变化、
//! 或者在没有起始分片时收到后续分片，当前正在重组的 NAL 单元整体丢弃。

use crate::packetizer::NAL_TYPE_FU_A;
use crate::rtp::FramePacket;
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

#[derive(Debug)]
struct FuState {
    timestamp: u32,
    last_sequence: u16,
    buf: BytesMut,
}

#[derive(Debug, Default)]
pub struct H264Depacketizer {
    fua: Option<FuState>,
    dropped_units: u64,
    discarded_packets: u64,
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 因丢包/乱序被放弃的 NAL 单元数
    pub fn dropped_units(&self) -> u64 {
        self.dropped_units
    }

    /// 不支持或无法使用而直接丢弃的包数
    pub fn discarded_packets(&self) -> u64 {
        self.discarded_packets
    }

    /// 输入一个包，凑齐一个 NAL 单元时返回它（不带起始码）
    pub fn push(&mut self, packet: &FramePacket) -> Option<Bytes> {
        let payload = &packet.payload;
        let Some(&indicator) = payload.first() else {
            self.discard("empty payload");
            return None;
        };

        match indicator & 0x1F {
            1..=23 => {
                if self.fua.take().is_some() {
                    self.abandon("single NAL interrupted a fragmented unit");
                }
                Some(payload.clone())
            }
            NAL_TYPE_FU_A => self.push_fragment(packet),
            other => {
                trace!("忽略 NAL 类型 {}", other);
                self.discard("unsupported packetization type");
                None
            }
        }
    }

    fn push_fragment(&mut self, packet: &FramePacket) -> Option<Bytes> {
        let payload = &packet.payload;
        if payload.len() < 2 {
            self.discard("truncated FU-A header");
            return None;
        }

        let indicator = payload[0];
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let seq = packet.header.sequence_number;
        let ts = packet.header.timestamp;

        if start {
            if self.fua.take().is_some() {
                self.abandon("new start fragment before end");
            }
            let mut buf = BytesMut::with_capacity(payload.len() * 4);
            buf.extend_from_slice(&[(indicator & 0xE0) | (fu_header & 0x1F)]);
            buf.extend_from_slice(&payload[2..]);
            self.fua = Some(FuState {
                timestamp: ts,
                last_sequence: seq,
                buf,
            });
        } else {
            let Some(state) = self.fua.as_mut() else {
                self.discard("continuation without start fragment");
                return None;
            };
            if state.timestamp != ts || state.last_sequence.wrapping_add(1) != seq {
                self.fua = None;
                self.abandon("fragment gap");
                return None;
            }
            state.last_sequence = seq;
            state.buf.extend_from_slice(&payload[2..]);
        }

        if end {
            return self.fua.take().map(|state| state.buf.freeze());
        }
        None
    }

    fn abandon(&mut self, reason: &str) {
        self.dropped_units += 1;
        debug!("放弃未完成的 NAL 单元: {}", reason);
    }

    fn discard(&mut self, reason: &str) {
        self.discarded_packets += 1;
        trace!("丢弃包: {}", reason);
    }
}
