//! WebSocket 信令客户端
//!
//! 供 peer 端使用：连接中继、注册，并以 [`SignalingMessage`] 的形式收发信令。

use crate::error::{Result, SignalingError};
use crate::protocol::{SignalingMessage, SignalingType};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// 信令发送端，可在多个任务间克隆
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl SignalingSender {
    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| SignalingError::ConnectionClosed)
    }

    /// 向指定客户端发送一条信令
    pub fn send_to(&self, kind: SignalingType, to: &str, data: impl Serialize) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.send(SignalingMessage::new(kind, "", to, data))
    }

    pub fn register(&self) -> Result<()> {
        self.send(SignalingMessage::register_request())
    }

    /// 把任意 mpsc 发送端包装成信令发送端
    pub fn from_channel(tx: mpsc::UnboundedSender<SignalingMessage>) -> Self {
        Self { tx }
    }
}

/// 信令客户端
#[derive(Debug)]
pub struct SignalingClient {
    sender: SignalingSender,
    inbound: mpsc::UnboundedReceiver<SignalingMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SignalingClient {
    /// 连接到信令服务器
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url).await?;
        info!("🔗 已连接信令服务器: {}", url);
        let (mut ws_sender, mut ws_receiver) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("⚠️ 序列化信令失败: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::text(text)).await {
                    warn!("⚠️ 发送信令失败: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalingMessage::from_json(text.as_str()) {
                        Ok(message) => {
                            if in_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("⚠️ 无法解析服务器消息: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("信令服务器关闭了连接");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("⚠️ 信令连接错误: {}", e);
                        break;
                    }
                }
            }
            debug!("信令读取任务退出");
        });

        Ok(Self {
            sender: SignalingSender { tx: out_tx },
            inbound: in_rx,
            reader,
            writer,
        })
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    pub fn register(&self) -> Result<()> {
        self.sender.register()
    }

    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        self.sender.send(message)
    }

    /// 接收下一条信令；连接关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.inbound.recv().await
    }

    /// 拆分为发送端与接收端
    pub fn split(self) -> (SignalingSender, mpsc::UnboundedReceiver<SignalingMessage>) {
        (self.sender, self.inbound)
    }

    /// 关闭连接
    pub fn close(self) {
        self.reader.abort();
        drop(self.sender);
        drop(self.writer);
    }
}
