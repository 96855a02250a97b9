//! 错误处理模块

mod config_error;

pub use config_error::ConfigError;

pub type Result<T> = std::result::Result<T, ConfigError>;
