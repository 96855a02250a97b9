//! Relaycast 通用基础设施
//!
//! 配置模型（TOML）与跨 crate 共享的错误类型。

pub mod config;
pub mod error;

pub use config::{
    BindConfig, LogConfig, MediaConfig, ObservabilityConfig, RelaycastConfig, SignalingConfig,
};
pub use error::{ConfigError, Result};
