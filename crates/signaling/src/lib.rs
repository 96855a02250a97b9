//! 信令中继服务
//!
//! 基于 JSON over WebSocket 的点对点信令中继
//!
//! # 模块结构
//!
//! ## 核心模块
//! - [`task_queue`]: 线程安全 FIFO
//! - [`worker`]: 工作线程与工作线程池
//! - [`registry`]: 会话注册表与在线名单
//! - [`router`]: 按消息类型分发
//! - [`server`]: WebSocket 连接处理
//!
//! ## 客户端
//! - [`client`]: peer 端使用的信令客户端

pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod task_queue;
pub mod worker;

// Axum router integration
pub mod axum_router;

pub use axum_router::create_signaling_router;

// Re-export commonly used types
pub use client::{SignalingClient, SignalingSender};
pub use error::{PoolError, SignalingError};
pub use protocol::{SignalingMessage, SignalingTask, SignalingType};
pub use registry::{ClientConnection, SessionRegistry};
pub use server::{SignalingServer, handle_websocket_connection};
pub use worker::{ResultSink, TaskProcessor, WorkerPool};
