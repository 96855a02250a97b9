//! Signaling 服务配置

use serde::{Deserialize, Serialize};

/// Signaling 服务配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignalingConfig {
    /// WebSocket 路径
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// 工作线程数量
    ///
    /// 所有入站信令消息由固定数量的工作线程从同一个任务队列中消费。
    /// 为 0 时服务拒绝启动。
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// 工作线程阻塞取任务的超时时间（毫秒）
    ///
    /// 决定了停止请求最迟多久被工作线程观察到。
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,

    /// 严格路由
    ///
    /// - true: 目标不在线时 OFFER/ANSWER/ICE 都只回复错误，不再转发
    /// - false: OFFER 在回复错误后仍尝试投递（兼容旧客户端）
    #[serde(default = "default_true")]
    pub strict_routing: bool,

    /// 已注册客户端断开时是否向其余在线客户端广播 PEER_LEFT
    #[serde(default = "default_true")]
    pub notify_peer_left: bool,
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_pop_timeout_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ws_path: default_ws_path(),
            workers: default_workers(),
            pop_timeout_ms: default_pop_timeout_ms(),
            strict_routing: true,
            notify_peer_left: true,
        }
    }
}

impl SignalingConfig {
    /// 取任务超时
    pub fn pop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.pop_timeout_ms)
    }

    /// 验证 Signaling 配置
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.ws_path.starts_with('/') {
            errors.push(format!(
                "Invalid signaling.ws_path '{}', must start with '/'",
                self.ws_path
            ));
        }

        if self.workers == 0 {
            errors.push("signaling.workers must be at least 1".to_string());
        } else if self.workers > 64 {
            errors.push(format!(
                "Warning: signaling.workers = {} is unusually large for a signaling relay",
                self.workers
            ));
        }

        if !(1..=5000).contains(&self.pop_timeout_ms) {
            errors.push(format!(
                "Invalid signaling.pop_timeout_ms {}, must be between 1 and 5000",
                self.pop_timeout_ms
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
