//! 统一配置管理系统
//!
//! Relaycast 所有配置项的定义、文档、默认值都在这里统一管理。

pub mod bind;
pub mod media;
pub mod signaling;

pub use crate::config::bind::BindConfig;
pub use crate::config::media::MediaConfig;
pub use crate::config::signaling::SignalingConfig;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Relaycast 的主配置结构体
///
/// 配置文件使用 TOML 格式，除 `name` 之外的字段均有默认值。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RelaycastConfig {
    /// 服务器实例名称
    ///
    /// 用于在日志中区分不同的中继实例，如 relaycast-01。
    pub name: String,

    /// 运行环境标识
    ///
    /// - "dev": 开发环境
    /// - "prod": 生产环境，额外检查日志配置
    /// - "test": 测试环境，用于自动化测试
    #[serde(default = "default_env")]
    pub env: String,

    /// 网络绑定配置
    #[serde(default)]
    pub bind: BindConfig,

    /// 信令服务配置
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// 媒体传输配置（peer 客户端使用）
    #[serde(default)]
    pub media: MediaConfig,

    /// 可观测性配置
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// 过滤级别
    ///
    /// 支持 EnvFilter 语法（如 "info,webrtc=warn"）。默认值 "info"。
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// 日志输出目标
    ///
    /// - "console": 仅输出到控制台（默认）
    /// - "file": 输出到文件
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 日志轮转开关
    ///
    /// 当 output = "file" 时有效：
    /// - true: 按天轮转日志文件
    /// - false: 追加到单个文件
    #[serde(default)]
    pub rotate: bool,

    /// 日志文件路径
    ///
    /// 当 output = "file" 时有效
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

impl Default for RelaycastConfig {
    fn default() -> Self {
        Self {
            name: "relaycast-default".to_string(),
            env: default_env(),
            bind: BindConfig::default(),
            signaling: SignalingConfig::default(),
            media: MediaConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl RelaycastConfig {
    /// 返回日志配置引用
    pub fn log_config(&self) -> &LogConfig {
        &self.observability.log
    }

    /// 检查是否使用控制台日志输出
    pub fn is_console_logging(&self) -> bool {
        self.observability.log.output == "console"
    }

    /// 检查是否应该轮转日志
    pub fn should_rotate_logs(&self) -> bool {
        self.observability.log.output == "file" && self.observability.log.rotate
    }

    /// 获取日志过滤级别，优先使用 RUST_LOG
    pub fn get_filter_level(&self) -> String {
        std::env::var("RUST_LOG")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.observability.filter_level.clone())
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::FileNotFound {
                path: path_ref.display().to_string(),
            });
        }

        if !path_ref.is_file() {
            return Err(ConfigError::NotAFile {
                path: path_ref.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path_ref)?;
        Ok(Self::from_toml(&content)?)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// 验证配置有效性
    ///
    /// 以 "Warning:" 开头的条目仅为提示，不阻止启动。
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // 验证实例名称
        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        // 验证环境
        if !["dev", "prod", "test"].contains(&self.env.as_str()) {
            errors.push(format!(
                "Invalid environment '{}', must be one of: dev, prod, test",
                self.env
            ));
        }

        // 验证绑定地址
        if self.bind.ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid bind.ip '{}', must be a valid IP address",
                self.bind.ip
            ));
        }
        if self.bind.port == 0 {
            errors.push(
                "Warning: bind.port = 0 lets the OS pick a random port; clients cannot find it"
                    .to_string(),
            );
        }

        if let Err(e) = self.signaling.validate() {
            errors.extend(e);
        }

        if let Err(e) = self.media.validate() {
            errors.extend(e);
        }

        // 验证过滤级别（EnvFilter 语法）
        let main_level = self
            .observability
            .filter_level
            .split(',')
            .next()
            .unwrap_or("")
            .trim();
        if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
            errors.push(format!(
                "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                self.observability.filter_level
            ));
        }

        // 验证日志输出
        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        }

        // 生产环境额外检查
        if self.env == "prod" {
            if self.observability.log.output == "console" {
                errors.push("Warning: Production environment should use file logging (observability.log.output = \"file\")".to_string());
            }
            if self.observability.log.output == "file" && !self.observability.log.rotate {
                errors.push("Warning: Production environment should enable log rotation (observability.log.rotate = true)".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// 判断一条校验结果是否只是警告
pub fn is_warning(entry: &str) -> bool {
    entry.starts_with("Warning:")
}
