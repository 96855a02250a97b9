//! 点对点会话编排
//!
//! 状态机：`Idle → Negotiating → Connected → Closed`，协商失败时
//! `Negotiating → Closed`。
//!
//! 会话状态只由一个驱动任务持有。传输回调、入站信令、待发送帧和停止命令
//! 都以消息形式进入这个任务，回调线程从不直接修改会话状态。
//!
//! 发起方和应答方共用同一条本地描述路径：传输对象生成的 offer 或 answer
//! 都以 [`TransportEvent::LocalDescription`] 到达，原样转成信令发给对端。

use crate::error::MediaError;
use crate::packetizer::H264Packetizer;
use crate::stats::{MediaStats, MediaStatsSnapshot};
use crate::transport::{PeerTransport, Reliability, SdpKind, TransportEvent, TransportFactory};
use bytes::Bytes;
use relaycast_common::MediaConfig;
use serde::Serialize;
use signaling::SignalingSender;
use signaling::protocol::{IceData, SdpData, SignalingMessage, SignalingType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// 传输对象创建前每个对端最多暂存的 ICE 候选数
const MAX_EARLY_CANDIDATES: usize = 32;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

#[derive(Debug)]
enum SessionCommand {
    Call(String),
    Signal(SignalingMessage),
    Frame { nal: Bytes, timestamp: u32 },
    Stop,
}

/// 会话句柄
///
/// 所有操作都只是投递消息，真正的状态转换发生在驱动任务里。
pub struct PeerSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    stats: Arc<MediaStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl PeerSession {
    /// 启动会话驱动任务
    ///
    /// * `signaling` - 发往信令服务器的出站通道（OFFER / ANSWER / ICE）
    /// * `inbound` - 数据通道收到的原始二进制消息，不做解析
    pub fn spawn(
        config: &MediaConfig,
        factory: Arc<dyn TransportFactory>,
        signaling: SignalingSender,
        inbound: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Self, MediaError> {
        let packetizer = H264Packetizer::from_config(config)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let stats = Arc::new(MediaStats::new());

        let driver = PeerSessionDriver {
            state: SessionState::Idle,
            state_tx,
            remote_peer: None,
            transport: None,
            early_candidates: HashMap::new(),
            factory,
            events_tx,
            signaling,
            inbound,
            packetizer,
            label: config.channel_label.clone(),
            reliability: Reliability::from(config),
            stats: stats.clone(),
        };
        let task = tokio::spawn(driver.run(commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            stats,
            task: Mutex::new(Some(task)),
        })
    }

    /// 作为发起方呼叫 `peer`
    ///
    /// 返回 `false` 表示会话已经结束。
    pub fn call(&self, peer: impl Into<String>) -> bool {
        self.commands.send(SessionCommand::Call(peer.into())).is_ok()
    }

    /// 交给会话处理一条 OFFER / ANSWER / ICE
    pub fn handle_signaling(&self, message: SignalingMessage) -> bool {
        self.commands.send(SessionCommand::Signal(message)).is_ok()
    }

    /// 发送一个 NAL 单元（不带起始码），时间戳为 90 kHz
    ///
    /// 会话未连通或已结束时该帧被丢弃并计数。
    pub fn send_frame(&self, nal: Bytes, timestamp: u32) {
        if self
            .commands
            .send(SessionCommand::Frame { nal, timestamp })
            .is_err()
        {
            self.stats.record_dropped_frame();
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// 等到会话进入 `target` 或 `Closed`，返回最终观察到的状态
    pub async fn wait_for(&self, target: SessionState) -> SessionState {
        let mut rx = self.state.clone();
        match rx
            .wait_for(|s| *s == target || *s == SessionState::Closed)
            .await
        {
            Ok(state) => *state,
            Err(_) => SessionState::Closed,
        }
    }

    pub fn stats(&self) -> MediaStatsSnapshot {
        self.stats.snapshot()
    }

    /// 停止会话，释放数据通道和传输对象；重复调用无副作用
    pub async fn stop(&self) {
        let _ = self.commands.send(SessionCommand::Stop);
        let task = self.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("❌ 会话驱动任务异常退出: {}", e);
            }
        }
    }
}

/// 持有会话状态的驱动任务
struct PeerSessionDriver {
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    remote_peer: Option<String>,
    transport: Option<Box<dyn PeerTransport>>,
    /// 先于 OFFER 到达的 ICE，按发送方暂存
    early_candidates: HashMap<String, Vec<IceData>>,
    factory: Arc<dyn TransportFactory>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    signaling: SignalingSender,
    inbound: mpsc::UnboundedSender<Bytes>,
    packetizer: H264Packetizer,
    label: String,
    reliability: Reliability,
    stats: Arc<MediaStats>,
}

impl PeerSessionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        debug!("会话驱动任务启动");
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.on_transport_event(event).await,
                command = commands.recv() => match command {
                    Some(SessionCommand::Stop) | None => {
                        self.close("stop requested").await;
                    }
                    Some(command) => self.on_command(command).await,
                },
            }
            if self.state == SessionState::Closed {
                break;
            }
        }

        // 关闭后仍在队列里的帧计为丢弃
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if matches!(command, SessionCommand::Frame { .. }) {
                self.stats.record_dropped_frame();
            }
        }
        debug!("会话驱动任务退出");
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!("🔄 会话状态: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.state_tx.send_replace(next);
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Call(peer) => self.call(peer).await,
            SessionCommand::Signal(message) => self.on_signaling(message).await,
            SessionCommand::Frame { nal, timestamp } => self.send_frame(nal, timestamp).await,
            SessionCommand::Stop => self.close("stop requested").await,
        }
    }

    async fn call(&mut self, peer: String) {
        if self.state != SessionState::Idle {
            warn!("⚠️ 会话已在进行中 ({:?})，忽略对 {} 的呼叫", self.state, peer);
            return;
        }
        info!("📞 呼叫 {}", peer);
        if !self.open_transport(peer).await {
            return;
        }
        self.early_candidates.clear();

        let result = match &self.transport {
            Some(transport) => transport.create_channel(&self.label, self.reliability).await,
            None => return,
        };
        if let Err(e) = result {
            self.fail(format!("create data channel: {e}")).await;
        }
    }

    /// 创建传输对象并进入 Negotiating
    async fn open_transport(&mut self, peer: String) -> bool {
        match self.factory.create(self.events_tx.clone()).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.remote_peer = Some(peer);
                self.set_state(SessionState::Negotiating);
                true
            }
            Err(e) => {
                error!("❌ 创建传输对象失败: {}", e);
                self.close("transport creation failed").await;
                false
            }
        }
    }

    async fn on_signaling(&mut self, message: SignalingMessage) {
        match message.kind {
            SignalingType::Offer => self.on_offer(message).await,
            SignalingType::Answer => {
                let Some(sdp) = self.sdp_from(&message) else {
                    return;
                };
                if !self.is_remote(&message.from) {
                    return;
                }
                let result = match &self.transport {
                    Some(transport) => {
                        transport
                            .set_remote_description(SdpKind::Answer, sdp)
                            .await
                    }
                    None => {
                        warn!("⚠️ 收到来自 {} 的 ANSWER，但尚未发起呼叫", message.from);
                        return;
                    }
                };
                if let Err(e) = result {
                    self.fail(format!("apply answer: {e}")).await;
                }
            }
            SignalingType::Ice => {
                let candidate: IceData = match message.data_as() {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        warn!("⚠️ 无效的 ICE 负载: {}", e);
                        return;
                    }
                };
                if !self.is_remote(&message.from) {
                    return;
                }
                match &self.transport {
                    Some(transport) => {
                        if let Err(e) = transport.add_remote_candidate(candidate).await {
                            warn!("⚠️ 添加远端 ICE 候选失败: {}", e);
                        }
                    }
                    None => self.stash_candidate(message.from, candidate),
                }
            }
            other => trace!("会话忽略信令 {}", other),
        }
    }

    async fn on_offer(&mut self, message: SignalingMessage) {
        let Some(sdp) = self.sdp_from(&message) else {
            return;
        };
        match self.state {
            SessionState::Idle => {
                info!("📨 收到来自 {} 的呼叫", message.from);
                if !self.open_transport(message.from.clone()).await {
                    return;
                }
            }
            SessionState::Closed => return,
            _ if !self.is_remote(&message.from) => return,
            _ => {}
        }

        let result = match &self.transport {
            Some(transport) => transport.set_remote_description(SdpKind::Offer, sdp).await,
            None => return,
        };
        if let Err(e) = result {
            self.fail(format!("apply offer: {e}")).await;
            return;
        }
        self.replay_candidates(&message.from).await;
    }

    fn stash_candidate(&mut self, from: String, candidate: IceData) {
        if self.state == SessionState::Closed {
            return;
        }
        let pending = self.early_candidates.entry(from).or_default();
        if pending.len() >= MAX_EARLY_CANDIDATES {
            warn!("⚠️ 暂存的 ICE 候选过多，丢弃");
            return;
        }
        debug!("传输对象尚未创建，暂存 ICE 候选");
        pending.push(candidate);
    }

    /// 把对端在 OFFER 之前发来的 ICE 交给新建的传输对象，其余对端的暂存一并丢弃
    async fn replay_candidates(&mut self, from: &str) {
        let pending = self.early_candidates.remove(from).unwrap_or_default();
        self.early_candidates.clear();
        let Some(transport) = &self.transport else {
            return;
        };
        if !pending.is_empty() {
            debug!("补发 {} 个先到的 ICE 候选", pending.len());
        }
        for candidate in pending {
            if let Err(e) = transport.add_remote_candidate(candidate).await {
                warn!("⚠️ 添加远端 ICE 候选失败: {}", e);
            }
        }
    }

    fn sdp_from(&self, message: &SignalingMessage) -> Option<String> {
        if self.state == SessionState::Closed {
            return None;
        }
        match message.data_as::<SdpData>() {
            Ok(data) => Some(data.sdp),
            Err(e) => {
                warn!("⚠️ 来自 {} 的 {} 缺少 sdp: {}", message.from, message.kind, e);
                None
            }
        }
    }

    /// 只接受当前对端的信令
    fn is_remote(&self, from: &str) -> bool {
        match &self.remote_peer {
            Some(peer) if peer == from => true,
            Some(peer) => {
                warn!("⚠️ 会话对端是 {}，忽略来自 {} 的信令", peer, from);
                false
            }
            None => true,
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalDescription { kind, sdp } => {
                debug!("本地 {:?} 已生成", kind);
                self.send_signal(kind.signaling_type(), SdpData { sdp });
            }
            TransportEvent::LocalCandidate(candidate) => {
                self.send_signal(SignalingType::Ice, candidate);
            }
            TransportEvent::ChannelOpen => {
                if self.state == SessionState::Negotiating {
                    self.set_state(SessionState::Connected);
                }
            }
            TransportEvent::ChannelMessage(data) => {
                self.stats.record_received();
                if self.inbound.send(data).is_err() {
                    trace!("入站接收端已关闭");
                }
            }
            TransportEvent::ChannelClosed => {
                if self.state != SessionState::Idle {
                    self.close("data channel closed").await;
                }
            }
            TransportEvent::ConnectionFailed => {
                self.fail("connection failed".to_string()).await;
            }
        }
    }

    fn send_signal(&self, kind: SignalingType, data: impl Serialize) {
        let Some(peer) = &self.remote_peer else {
            warn!("⚠️ 没有对端，无法发送 {}", kind);
            return;
        };
        if let Err(e) = self.signaling.send_to(kind, peer, data) {
            warn!("⚠️ 发送 {} 给 {} 失败: {}", kind, peer, e);
        }
    }

    async fn send_frame(&mut self, nal: Bytes, timestamp: u32) {
        let transport = match &self.transport {
            Some(transport)
                if self.state == SessionState::Connected && transport.is_channel_open() =>
            {
                transport
            }
            _ => {
                trace!("通道未就绪，丢弃帧");
                self.stats.record_dropped_frame();
                return;
            }
        };

        let packets = self.packetizer.packetize(&nal, timestamp);
        if packets.is_empty() {
            self.stats.record_dropped_frame();
            return;
        }
        for packet in packets {
            let data = packet.encode();
            let len = data.len();
            match transport.send(data).await {
                Ok(()) => self.stats.record_sent(len),
                Err(e) => {
                    self.stats.record_send_error();
                    debug!("发送媒体包失败: {}", e);
                }
            }
        }
    }

    async fn fail(&mut self, reason: String) {
        error!("❌ 会话失败: {}", reason);
        self.close(&reason).await;
    }

    async fn close(&mut self, reason: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        info!("🛑 会话关闭: {}", reason);
        self.set_state(SessionState::Closed);
    }
}
