//! 信令服务错误类型

use thiserror::Error;

/// 工作线程池错误
#[derive(Error, Debug)]
pub enum PoolError {
    /// 以 0 个工作线程启动，属于致命的前置条件错误
    #[error("worker pool cannot start with zero workers")]
    ZeroWorkers,

    #[error("worker pool is already running")]
    AlreadyRunning,

    /// 线程池未运行（尚未启动或已停止），任务被拒绝
    #[error("worker pool is not running")]
    NotRunning,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// 信令服务错误
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Invalid signaling message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Signaling connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, SignalingError>;
