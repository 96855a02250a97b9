use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use serial_test::serial;
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const START_TIMEOUT: Duration = Duration::from_secs(15);

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn choose_port() -> u16 {
    if let Some(p) = std::env::var("RELAYCAST_TEST_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        return p;
    }
    48080 + (std::process::id() as u16 % 1000)
}

fn write_config(dir: &Path, port: u16) -> PathBuf {
    let config_path = dir.join("config.toml");
    fs::write(
        &config_path,
        format!(
            r#"
name = "relaycast-process-test"
env = "test"

[bind]
ip = "127.0.0.1"
port = {port}

[signaling]
ws_path = "/ws"
workers = 2

[observability]
filter_level = "debug"

[observability.log]
output = "console"
"#
        ),
    )
    .expect("write config");
    config_path
}

fn spawn_relaycast(config: &Path, log_path: &Path) -> Child {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_relaycast"));
    let log_file = fs::File::create(log_path).expect("create log file");
    Command::new(bin)
        .arg("--config")
        .arg(config)
        .stdout(Stdio::from(log_file.try_clone().expect("dup log")))
        .stderr(Stdio::from(log_file))
        .spawn()
        .expect("spawn relaycast")
}

async fn wait_for_health(url: &str, child: &mut Child, log_path: &Path) {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap_or(None) {
            let log = fs::read_to_string(log_path).unwrap_or_default();
            panic!("relaycast exited early: status={status:?}\nlogs:\n{log}");
        }

        if let Ok(resp) = client.get(url).send().await
            && resp.status().is_success()
        {
            return;
        }
        if start.elapsed() > START_TIMEOUT {
            let log = fs::read_to_string(log_path).unwrap_or_default();
            panic!("health check not ready at {url}\nlogs:\n{log}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn recv_json(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("recv timeout")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("server sent json");
        }
    }
}

async fn register(ws: &mut Ws) -> Value {
    ws.send(Message::text(
        r#"{"type":"REGISTER_REQUEST","from":"","to":"Server","data":{}}"#,
    ))
    .await
    .expect("send register");
    let reply = recv_json(ws).await;
    assert_eq!(reply["type"], "REGISTER_SUCCESS");
    reply
}

#[tokio::test]
#[serial]
async fn relaycast_relays_between_registered_clients() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let port = choose_port();
    let config_path = write_config(tmp.path(), port);
    let log_path = tmp.path().join("relaycast.log");
    let mut child = spawn_relaycast(&config_path, &log_path);

    let health_url = format!("http://127.0.0.1:{port}/health");
    wait_for_health(&health_url, &mut child, &log_path).await;

    let resp = reqwest::get(&health_url).await.expect("health request");
    assert!(resp.status().is_success());
    let health: Value = resp.json().await.expect("health json");
    assert_eq!(health["status"], "ok");

    let url = format!("ws://127.0.0.1:{port}/ws");
    let (mut a, _) = connect_async(&url).await.expect("connect A");
    let (mut b, _) = connect_async(&url).await.expect("connect B");

    let a_reply = register(&mut a).await;
    let a_id = a_reply["data"]["peerId"].as_str().expect("peerId").to_string();
    assert_eq!(a_reply["data"]["peers"], serde_json::json!([]));

    let b_reply = register(&mut b).await;
    let b_id = b_reply["data"]["peerId"].as_str().expect("peerId").to_string();
    assert_eq!(b_reply["data"]["peers"], serde_json::json!([a_id]));

    let joined = recv_json(&mut a).await;
    assert_eq!(joined["type"], "PEER_JOINED");
    assert_eq!(joined["data"]["id"], b_id);

    let offer = serde_json::json!({
        "type": "OFFER", "from": "", "to": b_id, "data": {"sdp": "v=0"}
    });
    a.send(Message::text(offer.to_string())).await.expect("send offer");
    let relayed = recv_json(&mut b).await;
    assert_eq!(relayed["type"], "OFFER");
    assert_eq!(relayed["from"], a_id);
    assert_eq!(relayed["data"]["sdp"], "v=0");

    b.close(None).await.expect("close B");
    let left = recv_json(&mut a).await;
    assert_eq!(left["type"], "PEER_LEFT");
    assert_eq!(left["data"]["id"], b_id);

    let _ = child.kill();
    let _ = child.wait();
}
