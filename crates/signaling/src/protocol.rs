//! 信令协议
//!
//! WebSocket Text 帧承载的 JSON 消息：`{type, from, to, data}`。
//! 消息类型是封闭枚举，路由处用 `match` 做穷尽分发。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{AsRefStr, Display, EnumString};

/// 服务器自身在 `from` / `to` 字段中使用的身份
pub const SERVER_ID: &str = "Server";

/// REGISTER_SUCCESS 附带的欢迎语
pub const WELCOME_MESSAGE: &str = "Welcome!";

/// 信令消息类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalingType {
    RegisterRequest,
    RegisterSuccess,
    Offer,
    Answer,
    Ice,
    PeerJoined,
    PeerLeft,
    ErrorMessage,
}

/// 信令消息信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalingType,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    json!({})
}

impl SignalingMessage {
    pub fn new(
        kind: SignalingType,
        from: impl Into<String>,
        to: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            kind,
            from: from.into(),
            to: to.into(),
            data,
        }
    }

    /// 服务器发出的消息
    pub fn from_server(kind: SignalingType, to: impl Into<String>, data: impl Serialize) -> Self {
        let data = serde_json::to_value(data).unwrap_or_else(|_| empty_object());
        Self::new(kind, SERVER_ID, to, data)
    }

    /// 发给服务器的注册请求
    pub fn register_request() -> Self {
        Self::new(SignalingType::RegisterRequest, "", SERVER_ID, empty_object())
    }

    pub fn error(to: impl Into<String>, message: impl Into<String>) -> Self {
        Self::from_server(
            SignalingType::ErrorMessage,
            to,
            ErrorData {
                message: message.into(),
            },
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// 按类型解析 `data` 负载
    pub fn data_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.data)
    }
}

/// REGISTER_SUCCESS 负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSuccessData {
    pub peer_id: String,
    pub message: String,
    pub peers: Vec<String>,
}

/// PEER_JOINED / PEER_LEFT 负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerData {
    pub id: String,
}

/// ERROR_MESSAGE 负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

/// OFFER / ANSWER 负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpData {
    pub sdp: String,
}

/// ICE 负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceData {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// 一个完整的入站 Text 帧，尚未解析
///
/// 只携带客户端 id，工作线程处理时再到注册表里查找会话。
#[derive(Debug, Clone)]
pub struct SignalingTask {
    pub client_id: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl SignalingTask {
    pub fn new(client_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// 投递给工作线程池的连接事件
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// 客户端发来的一条信令
    Inbound(SignalingTask),
    /// 已注册的客户端断开，需要通知其余在线客户端
    Departed { client_id: String },
}

/// 工作线程产出的待投递消息
///
/// 目标会话在投递时才解析，连接可能已在排队期间关闭。
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: String,
    pub kind: SignalingType,
    pub text: String,
}

impl Outbound {
    pub fn new(message: &SignalingMessage) -> serde_json::Result<Self> {
        Ok(Self {
            target: message.to.clone(),
            kind: message.kind,
            text: message.to_json()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_type_wire_names() {
        assert_eq!(SignalingType::RegisterRequest.to_string(), "REGISTER_REQUEST");
        assert_eq!(SignalingType::ErrorMessage.as_ref(), "ERROR_MESSAGE");
        assert_eq!(SignalingType::from_str("ICE").unwrap(), SignalingType::Ice);
        assert_eq!(
            SignalingType::from_str("PEER_JOINED").unwrap(),
            SignalingType::PeerJoined
        );
        assert!(SignalingType::from_str("offer").is_err());
    }

    #[test]
    fn test_register_success_shape() {
        let msg = SignalingMessage::from_server(
            SignalingType::RegisterSuccess,
            "abc",
            RegisterSuccessData {
                peer_id: "abc".to_string(),
                message: WELCOME_MESSAGE.to_string(),
                peers: vec!["x".to_string()],
            },
        );
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "REGISTER_SUCCESS",
                "from": "Server",
                "to": "abc",
                "data": {"peerId": "abc", "message": "Welcome!", "peers": ["x"]}
            })
        );
    }

    #[test]
    fn test_ice_field_names() {
        let data: IceData = serde_json::from_value(json!({
            "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }))
        .unwrap();
        assert_eq!(data.sdp_mid.as_deref(), Some("0"));
        assert_eq!(data.sdp_mline_index, Some(0));

        let minimal: IceData = serde_json::from_value(json!({"candidate": "c"})).unwrap();
        assert_eq!(minimal.sdp_mid, None);
        assert_eq!(serde_json::to_value(&minimal).unwrap(), json!({"candidate": "c"}));
    }

    #[test]
    fn test_message_defaults() {
        let msg = SignalingMessage::from_json(r#"{"type":"PEER_LEFT"}"#).unwrap();
        assert_eq!(msg.kind, SignalingType::PeerLeft);
        assert_eq!(msg.from, "");
        assert_eq!(msg.data, json!({}));

        let req = SignalingMessage::register_request();
        assert_eq!(req.to, SERVER_ID);
    }
}
