//! 信令消息路由
//!
//! 在工作线程上执行：解析 JSON、按类型分发、把回复和转发写入结果通道。
//! 处理器从不直接接触 socket，目标会话在投递阶段才解析。

use crate::protocol::{
    Outbound, PeerData, RegisterSuccessData, RelayEvent, SignalingMessage, SignalingTask,
    SignalingType, WELCOME_MESSAGE,
};
use crate::registry::SessionRegistry;
use crate::worker::{ResultSink, TaskProcessor};
use relaycast_common::config::SignalingConfig;
use serde_json::{Map, Value, json};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

pub const ERR_INVALID_JSON: &str = "Invalid JSON";
pub const ERR_INVALID_TYPE: &str = "Invalid type";
pub const ERR_MISSING_TO: &str = "Missing 'to' field in OFFER/ANSWER/ICE";

/// 路由策略
#[derive(Debug, Clone, Copy)]
pub struct RoutingPolicy {
    /// 目标不在线时 OFFER 也不再转发
    pub strict_routing: bool,
    /// 已注册客户端离开时广播 PEER_LEFT
    pub notify_peer_left: bool,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            strict_routing: true,
            notify_peer_left: true,
        }
    }
}

impl From<&SignalingConfig> for RoutingPolicy {
    fn from(config: &SignalingConfig) -> Self {
        Self {
            strict_routing: config.strict_routing,
            notify_peer_left: config.notify_peer_left,
        }
    }
}

/// 信令消息路由器
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    policy: RoutingPolicy,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>, policy: RoutingPolicy) -> Self {
        Self { registry, policy }
    }

    /// 处理一条入站信令
    pub fn dispatch(&self, task: SignalingTask, sink: &ResultSink<Outbound>) {
        let span = info_span!("signaling", client_id = %task.client_id);
        let _guard = span.enter();

        let src = task.client_id.as_str();
        let object = match serde_json::from_str::<Value>(&task.payload) {
            Ok(Value::Object(object)) => object,
            _ => {
                info!("收到无法解析的消息 ({} 字节)", task.payload.len());
                emit(sink, SignalingMessage::error(src, ERR_INVALID_JSON));
                return;
            }
        };

        let Some(kind) = object
            .get("type")
            .and_then(Value::as_str)
            .and_then(|t| SignalingType::from_str(t).ok())
        else {
            info!("消息类型缺失或未知: {:?}", object.get("type"));
            emit(sink, SignalingMessage::error(src, ERR_INVALID_TYPE));
            return;
        };

        debug!(
            "处理 {} (排队 {} ms)",
            kind,
            (chrono::Utc::now() - task.received_at).num_milliseconds()
        );

        match kind {
            SignalingType::RegisterRequest => self.handle_register(src, sink),
            SignalingType::Offer | SignalingType::Answer | SignalingType::Ice => {
                self.handle_relay(kind, src, &object, sink)
            }
            // 只能由服务器发出的类型
            SignalingType::RegisterSuccess
            | SignalingType::PeerJoined
            | SignalingType::PeerLeft
            | SignalingType::ErrorMessage => {
                info!("客户端发送了服务器专用类型 {}", kind);
                emit(sink, SignalingMessage::error(src, ERR_INVALID_TYPE));
            }
        }
    }

    fn handle_register(&self, src: &str, sink: &ResultSink<Outbound>) {
        self.registry.register(src, |outcome| {
            emit(
                sink,
                SignalingMessage::from_server(
                    SignalingType::RegisterSuccess,
                    src,
                    RegisterSuccessData {
                        peer_id: src.to_string(),
                        message: WELCOME_MESSAGE.to_string(),
                        peers: outcome.peers.clone(),
                    },
                ),
            );

            if outcome.newly_joined {
                for peer in &outcome.peers {
                    emit(
                        sink,
                        SignalingMessage::from_server(
                            SignalingType::PeerJoined,
                            peer.as_str(),
                            PeerData { id: src.to_string() },
                        ),
                    );
                }
            }
        });
    }

    fn handle_relay(
        &self,
        kind: SignalingType,
        src: &str,
        object: &Map<String, Value>,
        sink: &ResultSink<Outbound>,
    ) {
        let Some(target) = object.get("to").and_then(Value::as_str) else {
            info!("{} 缺少 to 字段", kind);
            emit(sink, SignalingMessage::error(src, ERR_MISSING_TO));
            return;
        };

        if !self.registry.is_online(target) {
            warn!("⚠️ {} 的目标 {} 不在线", kind, target);
            emit(sink, SignalingMessage::error(src, format!("{target} is not online")));
            if self.policy.strict_routing || kind != SignalingType::Offer {
                return;
            }
        }

        let data = object.get("data").cloned().unwrap_or_else(|| json!({}));
        emit(sink, SignalingMessage::new(kind, src, target, data));
        debug!("🔀 转发 {}: {} -> {}", kind, src, target);
    }

    /// 已注册客户端离开后通知其余在线客户端
    pub fn announce_departure(&self, client_id: &str, sink: &ResultSink<Outbound>) {
        if !self.policy.notify_peer_left {
            return;
        }
        self.registry.with_roster(|roster| {
            for peer in roster {
                emit(
                    sink,
                    SignalingMessage::from_server(
                        SignalingType::PeerLeft,
                        peer.as_str(),
                        PeerData {
                            id: client_id.to_string(),
                        },
                    ),
                );
            }
        });
        info!("👋 已通知在线客户端: {} 离开", client_id);
    }
}

impl TaskProcessor<RelayEvent, Outbound> for MessageRouter {
    fn process(&self, event: RelayEvent, sink: &ResultSink<Outbound>) {
        match event {
            RelayEvent::Inbound(task) => self.dispatch(task, sink),
            RelayEvent::Departed { client_id } => self.announce_departure(&client_id, sink),
        }
    }
}

fn emit(sink: &ResultSink<Outbound>, message: SignalingMessage) {
    match Outbound::new(&message) {
        Ok(outbound) => {
            sink.emit(outbound);
        }
        Err(e) => error!("❌ 序列化 {} 失败: {}", message.kind, e),
    }
}
