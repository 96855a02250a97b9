//! 基于 webrtc-rs 的 [`PeerTransport`] 实现
//!
//! 只协商数据通道，不带音视频轨道。所有回调都翻译成 [`TransportEvent`]。

use crate::error::TransportError;
use crate::transport::{PeerTransport, Reliability, SdpKind, TransportEvent, TransportFactory};
use async_trait::async_trait;
use bytes::Bytes;
use relaycast_common::MediaConfig;
use signaling::protocol::IceData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// 按配置创建 webrtc-rs 传输对象
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, TransportError> {
        let transport = WebRtcTransport::new(&self.ice_servers, events).await?;
        Ok(Box::new(transport))
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    channel: ChannelSlot,
    events: mpsc::UnboundedSender<TransportEvent>,
    /// 远端描述设置之前到达的候选
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    remote_description_set: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("channel_open", &self.is_channel_open())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl WebRtcTransport {
    pub async fn new(
        ice_servers: &[String],
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let api = APIBuilder::new().build();
        let ice_servers = if ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);
        let channel: ChannelSlot = Arc::new(Mutex::new(None));

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE 候选收集完成");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(TransportEvent::LocalCandidate(IceData {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!("⚠️ 无法序列化本地 ICE 候选: {}", e),
                }
            })
        }));

        // 应答方的数据通道由对端创建
        let tx = events.clone();
        let slot = channel.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            let slot = slot.clone();
            Box::pin(async move {
                info!("📥 收到远端数据通道: {}", dc.label());
                wire_channel(&dc, tx);
                if let Ok(mut guard) = slot.lock() {
                    *guard = Some(dc);
                }
            })
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!("PeerConnection 状态: {}", state);
                if state == RTCPeerConnectionState::Failed {
                    let _ = tx.send(TransportEvent::ConnectionFailed);
                }
            })
        }));

        Ok(Self {
            pc,
            channel,
            events,
            pending_candidates: Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn current_channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.channel.lock().ok().and_then(|guard| guard.clone())
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn emit_local_description(&self, kind: SdpKind) -> Result<(), TransportError> {
        let description = match kind {
            SdpKind::Offer => self.pc.create_offer(None).await?,
            SdpKind::Answer => self.pc.create_answer(None).await?,
        };
        let sdp = description.sdp.clone();
        self.pc.set_local_description(description).await?;
        let _ = self
            .events
            .send(TransportEvent::LocalDescription { kind, sdp });
        Ok(())
    }

    async fn flush_pending_candidates(&self) {
        let pending = match self.pending_candidates.lock() {
            Ok(mut guard) => {
                self.remote_description_set.store(true, Ordering::Release);
                std::mem::take(&mut *guard)
            }
            Err(_) => return,
        };
        for candidate in pending {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!("⚠️ 应用缓存的 ICE 候选失败: {}", e);
            }
        }
    }
}

fn wire_channel(dc: &Arc<RTCDataChannel>, events: mpsc::UnboundedSender<TransportEvent>) {
    let tx = events.clone();
    let label = dc.label().to_string();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            info!("✅ 数据通道已打开: {}", label);
            let _ = tx.send(TransportEvent::ChannelOpen);
        })
    }));

    let tx = events.clone();
    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::ChannelClosed);
        })
    }));

    let tx = events;
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::ChannelMessage(msg.data));
        })
    }));
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_channel(
        &self,
        label: &str,
        reliability: Reliability,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let init = RTCDataChannelInit {
            ordered: Some(reliability.ordered),
            max_retransmits: reliability.max_retransmits,
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;
        wire_channel(&dc, self.events.clone());
        if let Ok(mut guard) = self.channel.lock() {
            *guard = Some(dc);
        }
        info!("📡 已创建数据通道: {}", label);

        self.emit_local_description(SdpKind::Offer).await
    }

    async fn set_remote_description(
        &self,
        kind: SdpKind,
        sdp: String,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let description = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp),
            SdpKind::Answer => RTCSessionDescription::answer(sdp),
        }
        .map_err(|e| TransportError::InvalidDescription(e.to_string()))?;

        self.pc.set_remote_description(description).await?;
        self.flush_pending_candidates().await;

        if kind == SdpKind::Offer {
            self.emit_local_description(SdpKind::Answer).await?;
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceData) -> Result<(), TransportError> {
        self.ensure_open()?;
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };

        if let Ok(mut pending) = self.pending_candidates.lock() {
            if !self.remote_description_set.load(Ordering::Acquire) {
                debug!("远端描述尚未设置，缓存 ICE 候选");
                pending.push(init);
                return Ok(());
            }
        }
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.ensure_open()?;
        let dc = self
            .current_channel()
            .filter(|dc| dc.ready_state() == RTCDataChannelState::Open)
            .ok_or(TransportError::ChannelNotOpen)?;
        dc.send(&data).await?;
        Ok(())
    }

    fn is_channel_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self
                .current_channel()
                .is_some_and(|dc| dc.ready_state() == RTCDataChannelState::Open)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let channel = self.channel.lock().ok().and_then(|mut guard| guard.take());
        if let Some(dc) = channel {
            if let Err(e) = dc.close().await {
                debug!("关闭数据通道出错: {}", e);
            }
        }
        if let Err(e) = self.pc.close().await {
            warn!("⚠️ 关闭 PeerConnection 出错: {}", e);
        }
        info!("🔌 传输已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn factory() -> WebRtcTransportFactory {
        // 本机回环，不依赖外网 STUN
        WebRtcTransportFactory::new(Vec::new())
    }

    async fn next_description(
        rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (SdpKind, String) {
        loop {
            match timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(TransportEvent::LocalDescription { kind, sdp })) => return (kind, sdp),
                Ok(Some(_)) => continue,
                other => panic!("no local description: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_offer_produces_answer() {
        let (caller_tx, mut caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, mut callee_rx) = mpsc::unbounded_channel();
        let caller = factory().create(caller_tx).await.unwrap();
        let callee = factory().create(callee_tx).await.unwrap();

        caller
            .create_channel("video-stream", Reliability::unreliable())
            .await
            .unwrap();
        let (kind, offer) = next_description(&mut caller_rx).await;
        assert_eq!(kind, SdpKind::Offer);
        assert!(offer.contains("webrtc-datachannel"));

        callee
            .set_remote_description(SdpKind::Offer, offer)
            .await
            .unwrap();
        let (kind, answer) = next_description(&mut callee_rx).await;
        assert_eq!(kind, SdpKind::Answer);
        caller
            .set_remote_description(SdpKind::Answer, answer)
            .await
            .unwrap();

        caller.close().await;
        caller.close().await;
        callee.close().await;
        assert!(matches!(
            caller.send(Bytes::from_static(b"x")).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_invalid_remote_description_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory().create(tx).await.unwrap();
        let result = transport
            .set_remote_description(SdpKind::Answer, "not sdp".to_string())
            .await;
        assert!(result.is_err());
        transport.close().await;
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = factory().create(tx).await.unwrap();
        assert!(!transport.is_channel_open());
        assert!(matches!(
            transport.send(Bytes::from_static(b"frame")).await,
            Err(TransportError::ChannelNotOpen)
        ));
        transport.close().await;
    }
}
