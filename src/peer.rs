//! 演示 peer
//!
//! 连接信令服务器并注册，可选地呼叫另一个 peer。通道打开后把 Annex-B
//! 文件按帧率推送出去；收到的包解包后写回 Annex-B 文件。

use crate::cli::PeerArgs;
use crate::error::Result;
use bytes::{Bytes, BytesMut};
use media::annexb::{is_vcl, split_nal_units, write_nal_unit};
use media::{FramePacket, H264Depacketizer, PeerSession, SessionState, WebRtcTransportFactory};
use relaycast_common::MediaConfig;
use signaling::SignalingClient;
use signaling::protocol::{ErrorData, PeerData, RegisterSuccessData, SignalingMessage, SignalingType};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 谁来发起呼叫
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallPlan {
    Wait,
    Peer(String),
    FirstAvailable,
    Done,
}

impl CallPlan {
    fn from_args(args: &PeerArgs) -> Self {
        match (&args.call, args.call_first) {
            (Some(peer), _) => CallPlan::Peer(peer.clone()),
            (None, true) => CallPlan::FirstAvailable,
            (None, false) => CallPlan::Wait,
        }
    }

    /// 根据已知的在线 peer 决定是否现在呼叫
    fn next_target<'a>(&mut self, available: impl IntoIterator<Item = &'a String>) -> Option<String> {
        let target = match self {
            CallPlan::Peer(peer) => Some(peer.clone()),
            CallPlan::FirstAvailable => available.into_iter().next().cloned(),
            CallPlan::Wait | CallPlan::Done => None,
        };
        if target.is_some() {
            *self = CallPlan::Done;
        }
        target
    }
}

pub async fn run_peer(args: PeerArgs, media: MediaConfig) -> Result<()> {
    let clip = match &args.input {
        Some(path) => Some(Bytes::from(tokio::fs::read(path).await?)),
        None => None,
    };
    let mut received = ReceivedStream::open(args.output.as_deref()).await?;
    let mut plan = CallPlan::from_args(&args);

    let client = SignalingClient::connect(&args.server).await?;
    client.register()?;
    let (sender, mut signals) = client.split();

    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let factory = Arc::new(WebRtcTransportFactory::from_config(&media));
    let session = Arc::new(PeerSession::spawn(&media, factory, sender, inbound_tx)?);
    let mut state_rx = session.subscribe();
    let mut streamer: Option<JoinHandle<()>> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("收到Ctrl-C信号，结束会话...");
                break;
            }
            message = signals.recv() => {
                let Some(message) = message else {
                    warn!("⚠️ 信令连接已断开");
                    break;
                };
                on_signaling(message, &session, &mut plan);
            }
            Some(data) = inbound_rx.recv() => received.push(&data).await?,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                match state {
                    SessionState::Connected => {
                        info!("🎬 数据通道已就绪");
                        if streamer.is_none() && let Some(clip) = &clip {
                            streamer = Some(tokio::spawn(stream_clip(
                                session.clone(),
                                clip.clone(),
                                args.fps,
                                media.clock_rate,
                            )));
                        }
                    }
                    SessionState::Closed => {
                        info!("会话已结束");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(task) = streamer {
        task.abort();
    }
    session.stop().await;

    // 会话关闭前已到达的包
    while let Ok(data) = inbound_rx.try_recv() {
        received.push(&data).await?;
    }
    received.finish().await?;

    let stats = session.stats();
    info!(
        "📊 发送 {} 包 / {} 字节，丢弃 {} 帧，发送失败 {} 次，接收 {} 包",
        stats.packets_sent,
        stats.bytes_sent,
        stats.frames_dropped,
        stats.send_errors,
        stats.packets_received
    );
    Ok(())
}

fn on_signaling(message: SignalingMessage, session: &PeerSession, plan: &mut CallPlan) {
    match message.kind {
        SignalingType::RegisterSuccess => match message.data_as::<RegisterSuccessData>() {
            Ok(data) => {
                info!("✅ 注册成功，本端 id: {}", data.peer_id);
                info!("👥 在线 peer: {:?}", data.peers);
                if let Some(target) = plan.next_target(&data.peers) {
                    session.call(target);
                }
            }
            Err(e) => warn!("⚠️ 无效的 REGISTER_SUCCESS: {}", e),
        },
        SignalingType::PeerJoined => {
            if let Ok(PeerData { id }) = message.data_as() {
                info!("👋 {} 上线", id);
                if let Some(target) = plan.next_target([&id]) {
                    session.call(target);
                }
            }
        }
        SignalingType::PeerLeft => {
            if let Ok(PeerData { id }) = message.data_as() {
                info!("👋 {} 离线", id);
            }
        }
        SignalingType::ErrorMessage => match message.data_as::<ErrorData>() {
            Ok(data) => warn!("⚠️ 服务器错误: {}", data.message),
            Err(_) => warn!("⚠️ 服务器错误: {}", message.data),
        },
        SignalingType::Offer | SignalingType::Answer | SignalingType::Ice => {
            session.handle_signaling(message);
        }
        SignalingType::RegisterRequest => debug!("忽略 REGISTER_REQUEST"),
    }
}

/// 每个 VCL NAL 推进的时间戳
fn timestamp_step(clock_rate: u32, fps: u32) -> u32 {
    clock_rate / fps.max(1)
}

async fn stream_clip(session: Arc<PeerSession>, clip: Bytes, fps: u32, clock_rate: u32) {
    let units = split_nal_units(&clip);
    info!("📤 开始推流: {} 个 NAL 单元, {} fps", units.len(), fps);

    let step = timestamp_step(clock_rate, fps);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))));
    let mut timestamp = 0u32;
    let mut frames = 0u64;

    for nal in units {
        let vcl = is_vcl(&nal);
        session.send_frame(nal, timestamp);
        if vcl {
            frames += 1;
            timestamp = timestamp.wrapping_add(step);
            ticker.tick().await;
        }
    }
    info!("📤 推流结束: {} 帧", frames);
}

/// 接收端：解包并可选地写入 Annex-B 文件
struct ReceivedStream {
    depacketizer: H264Depacketizer,
    output: Option<BufWriter<File>>,
    units: u64,
    malformed: u64,
}

impl ReceivedStream {
    async fn open(path: Option<&Path>) -> Result<Self> {
        let output = match path {
            Some(path) => {
                info!("💾 接收到的视频写入: {}", path.display());
                Some(BufWriter::new(File::create(path).await?))
            }
            None => None,
        };
        Ok(Self {
            depacketizer: H264Depacketizer::new(),
            output,
            units: 0,
            malformed: 0,
        })
    }

    async fn push(&mut self, data: &[u8]) -> Result<()> {
        let packet = match FramePacket::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.malformed += 1;
                debug!("无法解析的包: {}", e);
                return Ok(());
            }
        };
        let Some(nal) = self.depacketizer.push(&packet) else {
            return Ok(());
        };
        self.units += 1;
        if let Some(output) = self.output.as_mut() {
            let mut buf = BytesMut::with_capacity(nal.len() + 4);
            write_nal_unit(&mut buf, &nal);
            output.write_all(&buf).await?;
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        if let Some(output) = self.output.as_mut() {
            output.flush().await?;
        }
        info!(
            "📥 收到 {} 个 NAL 单元，丢弃未完成单元 {} 个，无效包 {} 个",
            self.units,
            self.depacketizer.dropped_units(),
            self.malformed + self.depacketizer.discarded_packets()
        );
        Ok(())
    }
}
