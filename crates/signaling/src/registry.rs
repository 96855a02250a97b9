//! 会话注册表
//!
//! 连接 id → 发送通道的映射，以及按注册顺序排列的在线名单。
//! 注册、广播、断开会在多个工作线程和连接任务之间竞争，所以两者放在同一把
//! 注册表级别的读写锁之下。

use crate::protocol::Outbound;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 客户端连接信息
#[derive(Debug)]
pub struct ClientConnection {
    pub id: String,
    /// 连接写任务的发送端，只承载序列化好的 JSON 文本
    pub sender: mpsc::UnboundedSender<String>,
    pub client_ip: Option<IpAddr>,
    pub connected_at: DateTime<Utc>,
}

/// 注册结果，在注册表锁内交给调用方
#[derive(Debug)]
pub struct RegisterOutcome {
    /// 此前在线的其他客户端（不含自己）
    pub peers: Vec<String>,
    /// 首次注册为 true；重复注册不会再次广播 PEER_JOINED
    pub newly_joined: bool,
}

/// 断开时从注册表移除的信息
#[derive(Debug)]
pub struct Departure {
    pub connection: ClientConnection,
    pub was_registered: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<String, ClientConnection>,
    roster: Vec<String>,
}

/// 会话注册表
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // 锁内只有集合操作和非阻塞的通道发送，毒化后状态依旧可用
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 新连接建立
    pub fn connect(
        &self,
        id: &str,
        sender: mpsc::UnboundedSender<String>,
        client_ip: Option<IpAddr>,
    ) {
        let connection = ClientConnection {
            id: id.to_string(),
            sender,
            client_ip,
            connected_at: Utc::now(),
        };
        if self.write().sessions.insert(id.to_string(), connection).is_some() {
            warn!("⚠️ 会话 {} 已存在，旧连接被替换", id);
        }
    }

    /// 把连接加入在线名单
    ///
    /// `announce` 在写锁内执行：先回复注册者、再通知其他在线客户端，
    /// 最后才把注册者加入名单，所以注册者永远收不到自己的 PEER_JOINED。
    /// 会话已断开时直接返回 false。
    pub fn register<F>(&self, id: &str, announce: F) -> bool
    where
        F: FnOnce(&RegisterOutcome),
    {
        let mut state = self.write();
        if !state.sessions.contains_key(id) {
            warn!("⚠️ 客户端 {} 在注册处理前已断开，忽略注册", id);
            return false;
        }

        let newly_joined = !state.roster.iter().any(|peer| peer == id);
        let outcome = RegisterOutcome {
            peers: state
                .roster
                .iter()
                .filter(|peer| peer.as_str() != id)
                .cloned()
                .collect(),
            newly_joined,
        };

        announce(&outcome);

        if newly_joined {
            state.roster.push(id.to_string());
            info!("✅ 客户端 {} 已注册，在线 {} 个", id, state.roster.len());
        } else {
            debug!("客户端 {} 重复注册", id);
        }
        true
    }

    /// 移除会话（幂等）
    pub fn remove(&self, id: &str) -> Option<Departure> {
        let mut state = self.write();
        let connection = state.sessions.remove(id)?;
        let before = state.roster.len();
        state.roster.retain(|peer| peer != id);
        Some(Departure {
            connection,
            was_registered: state.roster.len() != before,
        })
    }

    /// 在读锁内访问在线名单
    pub fn with_roster<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&[String]) -> T,
    {
        f(&self.read().roster)
    }

    /// 在线名单快照
    pub fn roster(&self) -> Vec<String> {
        self.read().roster.clone()
    }

    /// 是否已注册在线
    pub fn is_online(&self, id: &str) -> bool {
        self.read().roster.iter().any(|peer| peer == id)
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// 投递一条消息到目标会话
    ///
    /// 目标不存在或连接已关闭时记录警告并丢弃。
    pub fn deliver(&self, outbound: &Outbound) -> bool {
        let state = self.read();
        let Some(client) = state.sessions.get(&outbound.target) else {
            warn!(
                "⚠️ 目标 {} 已离线，丢弃 {} 消息",
                outbound.target, outbound.kind
            );
            return false;
        };

        if client.sender.send(outbound.text.clone()).is_err() {
            warn!(
                "⚠️ 客户端 {} 连接已关闭，丢弃 {} 消息",
                outbound.target, outbound.kind
            );
            return false;
        }
        debug!("📤 {} -> {}", outbound.kind, outbound.target);
        true
    }
}
