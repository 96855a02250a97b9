//! 媒体传输配置
//!
//! 打包器参数与数据通道可靠性设置，由 peer 客户端使用。

use serde::{Deserialize, Serialize};

/// 单个包负载的默认上限，留出 IP/UDP/DTLS/SCTP 开销后低于常见路径 MTU
pub const DEFAULT_MAX_PAYLOAD: usize = 1100;

/// 媒体配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaConfig {
    /// 单包负载上限（字节，不含 12 字节包头）
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,

    /// 动态负载类型
    #[serde(default = "default_payload_type")]
    pub payload_type: u8,

    /// 时间戳时钟频率
    #[serde(default = "default_clock_rate")]
    pub clock_rate: u32,

    /// 视频数据通道标签
    #[serde(default = "default_channel_label")]
    pub channel_label: String,

    /// 数据通道是否保序
    #[serde(default)]
    pub ordered: bool,

    /// 数据通道最大重传次数
    #[serde(default)]
    pub max_retransmits: u16,

    /// ICE 服务器列表
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

fn default_payload_type() -> u8 {
    96
}

fn default_clock_rate() -> u32 {
    90_000
}

fn default_channel_label() -> String {
    "video-stream".to_string()
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_payload: default_max_payload(),
            payload_type: default_payload_type(),
            clock_rate: default_clock_rate(),
            channel_label: default_channel_label(),
            ordered: false,
            max_retransmits: 0,
            ice_servers: default_ice_servers(),
        }
    }
}

impl MediaConfig {
    /// 验证媒体配置
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // FU-A 分片需要 2 字节的指示符和分片头
        if self.max_payload <= 2 {
            errors.push(format!(
                "Invalid media.max_payload {}, must be greater than 2",
                self.max_payload
            ));
        } else if self.max_payload > 1200 {
            errors.push(format!(
                "Warning: media.max_payload {} may exceed the path MTU",
                self.max_payload
            ));
        }

        if self.payload_type > 127 {
            errors.push(format!(
                "Invalid media.payload_type {}, must be between 0 and 127",
                self.payload_type
            ));
        }

        if self.clock_rate == 0 {
            errors.push("media.clock_rate cannot be 0".to_string());
        }

        if self.channel_label.trim().is_empty() {
            errors.push("media.channel_label cannot be empty".to_string());
        }

        for server in &self.ice_servers {
            if !(server.starts_with("stun:") || server.starts_with("turn:")) {
                errors.push(format!(
                    "Invalid ICE server '{server}', must start with stun: or turn:"
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
