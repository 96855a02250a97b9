//! Signaling 服务集成测试
//!
//! 启动真实的 axum 服务，用 tokio-tungstenite 客户端验证注册、转发、错误回复和离线通知

use futures_util::{SinkExt, StreamExt};
use relaycast_common::config::SignalingConfig;
use serde_json::{Value, json};
use signaling::axum_router::create_signaling_router;
use signaling::protocol::{PeerData, RegisterSuccessData, SignalingMessage, SignalingType};
use signaling::{SignalingClient, SignalingServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as TungsteniteMessage};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 测试辅助：创建信令服务器
async fn create_test_server(config: SignalingConfig) -> (String, Arc<SignalingServer>) {
    let server = Arc::new(SignalingServer::start(&config).expect("Failed to start server"));
    let app = create_signaling_router(server.clone(), &config.ws_path)
        .expect("Failed to create router");

    // 绑定到随机端口
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ws_url = format!("ws://{addr}{}", config.ws_path);

    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await;
    });

    (ws_url, server)
}

/// 测试辅助：接收下一条 JSON 信令
async fn receive_json(ws: &mut WsStream) -> SignalingMessage {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for message")
            .expect("Connection closed")
            .expect("WebSocket error");
        if let TungsteniteMessage::Text(text) = msg {
            return SignalingMessage::from_json(text.as_str()).expect("Invalid server JSON");
        }
    }
}

/// 测试辅助：断言一段时间内没有新消息
async fn assert_silent(ws: &mut WsStream) {
    let result = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "Unexpected message: {result:?}");
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(TungsteniteMessage::text(value.to_string()))
        .await
        .unwrap();
}

/// 测试辅助：连接并注册，返回分配的 id 和 peers
async fn register(ws_url: &str) -> (WsStream, String, Vec<String>) {
    let (mut ws, _) = connect_async(ws_url).await.unwrap();
    send_json(
        &mut ws,
        json!({"type": "REGISTER_REQUEST", "to": "Server", "data": {}}),
    )
    .await;

    let reply = receive_json(&mut ws).await;
    assert_eq!(reply.kind, SignalingType::RegisterSuccess);
    assert_eq!(reply.from, "Server");
    let data: RegisterSuccessData = reply.data_as().unwrap();
    assert_eq!(data.message, "Welcome!");
    assert_eq!(reply.to, data.peer_id);
    (ws, data.peer_id, data.peers)
}

#[tokio::test]
async fn test_register_roster_and_join_notifications() {
    let (ws_url, _server) = create_test_server(SignalingConfig::default()).await;

    let (mut a, a_id, a_peers) = register(&ws_url).await;
    assert!(a_peers.is_empty());
    assert_eq!(a_id.len(), 32, "session ids are 32 hex chars");

    let (mut b, b_id, b_peers) = register(&ws_url).await;
    assert_eq!(b_peers, vec![a_id.clone()]);

    let joined = receive_json(&mut a).await;
    assert_eq!(joined.kind, SignalingType::PeerJoined);
    assert_eq!(joined.data_as::<PeerData>().unwrap().id, b_id);

    // B 不会收到自己的 PEER_JOINED
    assert_silent(&mut b).await;
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn test_offer_answer_ice_relay() {
    let (ws_url, _server) = create_test_server(SignalingConfig::default()).await;
    let (mut a, a_id, _) = register(&ws_url).await;
    let (mut b, b_id, _) = register(&ws_url).await;
    let _ = receive_json(&mut a).await; // PEER_JOINED

    send_json(
        &mut a,
        json!({"type": "OFFER", "from": "forged", "to": b_id, "data": {"sdp": "v=0 offer"}}),
    )
    .await;
    let offer = receive_json(&mut b).await;
    assert_eq!(offer.kind, SignalingType::Offer);
    assert_eq!(offer.from, a_id, "server overwrites the sender id");
    assert_eq!(offer.to, b_id);
    assert_eq!(offer.data, json!({"sdp": "v=0 offer"}));

    send_json(
        &mut b,
        json!({"type": "ANSWER", "to": a_id, "data": {"sdp": "v=0 answer"}}),
    )
    .await;
    let answer = receive_json(&mut a).await;
    assert_eq!(answer.kind, SignalingType::Answer);
    assert_eq!(answer.from, b_id);

    send_json(&mut b, json!({"type": "ICE", "to": a_id})).await;
    let ice = receive_json(&mut a).await;
    assert_eq!(ice.kind, SignalingType::Ice);
    assert_eq!(ice.data, json!({}));
}

#[tokio::test]
async fn test_error_replies() {
    let (ws_url, _server) = create_test_server(SignalingConfig::default()).await;
    let (mut a, _, _) = register(&ws_url).await;

    let cases = [
        (TungsteniteMessage::text("{broken"), "Invalid JSON"),
        (TungsteniteMessage::text(r#"{"data":{}}"#), "Invalid type"),
        (TungsteniteMessage::text(r#"{"type":"BYE"}"#), "Invalid type"),
        (
            TungsteniteMessage::text(r#"{"type":"OFFER","data":{"sdp":"x"}}"#),
            "Missing 'to' field in OFFER/ANSWER/ICE",
        ),
        (
            TungsteniteMessage::text(r#"{"type":"ICE","to":"nobody","data":{}}"#),
            "nobody is not online",
        ),
    ];

    for (frame, expected) in cases {
        a.send(frame).await.unwrap();
        let reply = receive_json(&mut a).await;
        assert_eq!(reply.kind, SignalingType::ErrorMessage);
        assert_eq!(reply.data["message"], expected);
    }

    // Binary 帧被忽略，连接保持可用
    a.send(TungsteniteMessage::Binary(vec![1u8, 2, 3].into()))
        .await
        .unwrap();
    assert_silent(&mut a).await;
    a.send(TungsteniteMessage::text("{}")).await.unwrap();
    assert_eq!(receive_json(&mut a).await.data["message"], "Invalid type");
}

#[tokio::test]
async fn test_peer_left_broadcast() {
    let (ws_url, server) = create_test_server(SignalingConfig::default()).await;
    let (mut a, _, _) = register(&ws_url).await;
    let (b, b_id, _) = register(&ws_url).await;
    let _ = receive_json(&mut a).await; // PEER_JOINED

    drop(b);
    let left = receive_json(&mut a).await;
    assert_eq!(left.kind, SignalingType::PeerLeft);
    assert_eq!(left.data_as::<PeerData>().unwrap().id, b_id);
    assert!(!server.registry().is_online(&b_id));

    // 发给已离开客户端的消息只会得到离线错误
    send_json(&mut a, json!({"type": "OFFER", "to": b_id, "data": {}})).await;
    let reply = receive_json(&mut a).await;
    assert_eq!(reply.kind, SignalingType::ErrorMessage);
}

#[tokio::test]
async fn test_peer_left_disabled() {
    let config = SignalingConfig {
        notify_peer_left: false,
        ..Default::default()
    };
    let (ws_url, _server) = create_test_server(config).await;
    let (mut a, _, _) = register(&ws_url).await;
    let (b, _, _) = register(&ws_url).await;
    let _ = receive_json(&mut a).await;

    drop(b);
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn test_signaling_client_roundtrip() {
    let (ws_url, _server) = create_test_server(SignalingConfig::default()).await;

    let mut alice = SignalingClient::connect(&ws_url).await.unwrap();
    alice.register().unwrap();
    let welcome = timeout(Duration::from_secs(5), alice.recv())
        .await
        .unwrap()
        .unwrap();
    let alice_id = welcome.data_as::<RegisterSuccessData>().unwrap().peer_id;

    let mut bob = SignalingClient::connect(&ws_url).await.unwrap();
    bob.register().unwrap();
    let welcome = timeout(Duration::from_secs(5), bob.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        welcome.data_as::<RegisterSuccessData>().unwrap().peers,
        vec![alice_id.clone()]
    );

    bob.sender()
        .send_to(SignalingType::Offer, &alice_id, json!({"sdp": "hello"}))
        .unwrap();

    // alice 先收到 PEER_JOINED，然后是 OFFER
    let joined = timeout(Duration::from_secs(5), alice.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(joined.kind, SignalingType::PeerJoined);
    let offer = timeout(Duration::from_secs(5), alice.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(offer.kind, SignalingType::Offer);
    assert_eq!(offer.data, json!({"sdp": "hello"}));
}

#[tokio::test]
async fn test_health_and_shutdown() {
    let (ws_url, server) = create_test_server(SignalingConfig::default()).await;
    let (_a, _, _) = register(&ws_url).await;
    assert_eq!(server.registry().roster().len(), 1);

    server.shutdown().await;
    // 再次关闭是无操作
    server.shutdown().await;

    let result = server.submit(signaling::protocol::RelayEvent::Departed {
        client_id: "x".to_string(),
    });
    assert!(matches!(result, Err(signaling::PoolError::NotRunning)));
}

#[tokio::test]
async fn test_zero_workers_refuses_to_start() {
    let config = SignalingConfig {
        workers: 0,
        ..Default::default()
    };
    let result = SignalingServer::start(&config);
    assert!(matches!(result, Err(signaling::PoolError::ZeroWorkers)));
}
