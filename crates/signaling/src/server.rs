//! 信令服务器
//!
//! 每个 WebSocket 连接拆成接收任务和发送任务：接收到的 Text 帧封装成
//! [`SignalingTask`] 交给工作线程池，工作线程产出的消息经由单一投递任务
//! 查找注册表后写入目标连接的发送通道。
//!
//! 服务器对象由进程入口显式构造并注入到 axum 状态中，同一进程可以存在多个实例。

use crate::error::PoolError;
use crate::protocol::{Outbound, RelayEvent, SignalingTask};
use crate::registry::SessionRegistry;
use crate::router::{MessageRouter, RoutingPolicy};
use crate::worker::WorkerPool;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use relaycast_common::config::SignalingConfig;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// 信令服务器状态
pub struct SignalingServer {
    registry: Arc<SessionRegistry>,
    pool: Arc<WorkerPool<RelayEvent>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
    policy: RoutingPolicy,
}

impl std::fmt::Debug for SignalingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingServer")
            .field("sessions", &self.registry.session_count())
            .field("workers", &self.pool.worker_count())
            .field("policy", &self.policy)
            .finish()
    }
}

impl SignalingServer {
    /// 启动工作线程池和投递任务
    ///
    /// 必须在 tokio 运行时内调用。`workers == 0` 时返回 [`PoolError::ZeroWorkers`]。
    pub fn start(config: &SignalingConfig) -> Result<Self, PoolError> {
        let registry = Arc::new(SessionRegistry::new());
        let policy = RoutingPolicy::from(config);
        let pool = Arc::new(WorkerPool::new(config.pop_timeout()));

        let router = MessageRouter::new(registry.clone(), policy);
        let results = pool.start(config.workers, router)?;
        let delivery = tokio::spawn(deliver_loop(registry.clone(), results));

        info!(
            "✅ 信令服务器已启动: workers={}, strict_routing={}, notify_peer_left={}",
            config.workers, policy.strict_routing, policy.notify_peer_left
        );

        Ok(Self {
            registry,
            pool,
            delivery: Mutex::new(Some(delivery)),
            policy,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// 提交连接事件到工作线程池
    pub fn submit(&self, event: RelayEvent) -> Result<(), PoolError> {
        self.pool.submit_task(event)
    }

    /// 优雅停止：排空任务队列、等待工作线程退出，再等投递任务把剩余消息发完
    pub async fn shutdown(&self) {
        let pool = self.pool.clone();
        match tokio::task::spawn_blocking(move || pool.stop()).await {
            Ok(true) => info!("🛑 信令工作线程已全部退出"),
            Ok(false) => debug!("信令工作线程池已处于停止状态"),
            Err(e) => error!("❌ 停止工作线程池失败: {}", e),
        }

        let delivery = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = delivery
            && let Err(e) = handle.await
        {
            error!("❌ 投递任务异常退出: {}", e);
        }
    }
}

async fn deliver_loop(
    registry: Arc<SessionRegistry>,
    mut results: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = results.recv().await {
        registry.deliver(&outbound);
    }
    debug!("结果通道已关闭，投递任务退出");
}

/// 处理 WebSocket 连接
pub async fn handle_websocket_connection(
    websocket: WebSocket,
    server: Arc<SignalingServer>,
    client_ip: Option<IpAddr>,
) {
    let client_id = Uuid::new_v4().simple().to_string();
    let span = info_span!("connection", client_id = %client_id);
    info!(
        parent: &span,
        "🔗 新 WebSocket 客户端连接: {} (IP: {:?})", client_id, client_ip
    );

    // 分离读写流
    let (mut ws_sender, mut ws_receiver) = websocket.split();

    // 注册表持有发送端，连接移除后发送任务自然结束
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<String>();
    server.registry().connect(&client_id, direct_tx, client_ip);

    let server_for_receive = server.clone();
    let client_id_for_receive = client_id.clone();
    let mut receive_task = tokio::spawn(
        async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let task = SignalingTask::new(&client_id_for_receive, text.as_str());
                        if let Err(e) = server_for_receive.submit(RelayEvent::Inbound(task)) {
                            warn!("⚠️ 信令任务提交失败，关闭连接: {}", e);
                            break;
                        }
                    }
                    Ok(WsMessage::Binary(_)) => {
                        warn!("收到 Binary 消息，忽略");
                    }
                    Ok(WsMessage::Close(_)) => {
                        info!("客户端 {} 主动断开连接", client_id_for_receive);
                        break;
                    }
                    Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => {}
                    Err(e) => {
                        error!("WebSocket 错误: {}", e);
                        break;
                    }
                }
            }
        }
        .instrument(span.clone()),
    );

    let mut send_task = tokio::spawn(
        async move {
            while let Some(text) = direct_rx.recv().await {
                if ws_sender.send(WsMessage::Text(text.into())).await.is_err() {
                    debug!("写入 WebSocket 失败，发送任务退出");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        }
        .instrument(span.clone()),
    );

    // 等待任一任务完成
    tokio::select! {
        _ = &mut receive_task => send_task.abort(),
        _ = &mut send_task => receive_task.abort(),
    }

    cleanup_client(&client_id, &server);
    info!(parent: &span, "🔌 客户端 {} 已断开连接", client_id);
}

/// 清理客户端连接
fn cleanup_client(client_id: &str, server: &SignalingServer) {
    let Some(departure) = server.registry().remove(client_id) else {
        debug!("客户端 {} 已被清理", client_id);
        return;
    };

    let lifetime = chrono::Utc::now() - departure.connection.connected_at;
    info!(
        "🧹 清理客户端 {} (注册: {}, 连接时长 {}s)",
        client_id,
        departure.was_registered,
        lifetime.num_seconds()
    );

    if departure.was_registered && server.policy.notify_peer_left {
        let event = RelayEvent::Departed {
            client_id: client_id.to_string(),
        };
        if let Err(e) = server.submit(event) {
            debug!("服务器停止中，跳过 PEER_LEFT 广播: {}", e);
        }
    }
}
