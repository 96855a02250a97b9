use serde::{Deserialize, Serialize};

/// 网络绑定配置
///
/// 中继进程只暴露一个 HTTP 监听端口，WebSocket 升级和健康检查共用。
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BindConfig {
    /// 绑定 IP 地址
    ///
    /// 通常使用 "0.0.0.0" 监听所有接口。
    #[serde(default = "default_ip")]
    pub ip: String,

    /// 绑定端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
        }
    }
}

impl BindConfig {
    /// 返回 `ip:port` 形式的监听地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
