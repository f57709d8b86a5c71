//! 频道注册表
//!
//! 维护频道的在线连接，负责加入时的访问控制、频道创建，以及把一行文本扇出给频道内的所有连接。
//! 外层 map 只在查找/插入频道时加写锁，广播时只持有对应频道的读锁。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{Channel, ChannelId, ChannelName, Membership, UserId, UserIdentity, Username};
use tokio::sync::{mpsc, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcaster::{MessageBroadcast, MessageBroadcaster};
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::locks::ChannelLocks;
use crate::repository::{BlockRepository, ChannelRepository, MembershipRepository};

/// 每个连接待发送队列的默认容量
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 注册表中的一个在线连接
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub channel: ChannelName,
    pub user_id: UserId,
    pub username: Username,
    pub is_moderator: bool,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// 非阻塞地把一行文本放入发送队列
    pub fn send_line(&self, line: impl Into<String>) -> bool {
        match self.outbound.try_send(line.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    channel = %self.channel,
                    connection_id = %self.id,
                    username = %self.username,
                    "发送队列已满，丢弃消息"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = %self.id, "连接已关闭，跳过发送");
                false
            }
        }
    }

    /// 强制关闭：先放入最后一条说明，再取消连接
    pub fn close(&self, reason: impl Into<String>) {
        self.send_line(reason);
        self.closed.cancel();
    }

    /// 连接被强制关闭时触发的取消令牌
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// `join` 的结果：连接句柄、发送队列的接收端和当前在线成员
pub struct JoinedConnection {
    pub handle: ConnectionHandle,
    pub outbound: mpsc::Receiver<String>,
    pub members: Vec<Username>,
}

type ChannelConnections = Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>;

pub struct ChannelRegistryDependencies {
    pub channels: Arc<dyn ChannelRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub blocks: Arc<dyn BlockRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct ChannelRegistry {
    deps: ChannelRegistryDependencies,
    live: RwLock<HashMap<ChannelName, ChannelConnections>>,
    locks: ChannelLocks,
    outbound_capacity: usize,
}

impl ChannelRegistry {
    pub fn new(deps: ChannelRegistryDependencies) -> Self {
        Self::with_capacity(deps, DEFAULT_OUTBOUND_CAPACITY)
    }

    pub fn with_capacity(deps: ChannelRegistryDependencies, outbound_capacity: usize) -> Self {
        Self {
            deps,
            live: RwLock::new(HashMap::new()),
            locks: ChannelLocks::new(),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// 频道级管理锁。加入检查与管理命令都在这把锁下执行，彼此线性化。
    pub async fn lock_channel(&self, channel: &ChannelName) -> OwnedMutexGuard<()> {
        self.locks.acquire(channel).await
    }

    /// 创建频道（幂等），创建者自动成为成员
    pub async fn create_channel(
        &self,
        name: &ChannelName,
        creator: &UserIdentity,
    ) -> Result<Channel, ApplicationError> {
        if !creator.is_moderator() {
            return Err(ApplicationError::Forbidden);
        }
        if let Some(existing) = self.deps.channels.find_by_name(name).await? {
            return Ok(existing);
        }

        let now = self.deps.clock.now();
        let channel = Channel::new(ChannelId::new(Uuid::new_v4()), name.clone(), creator.id, now);
        let channel = self.deps.channels.create_if_absent(channel).await?;
        self.deps
            .memberships
            .upsert(Membership::new(name.clone(), creator.id, now))
            .await?;

        info!(channel = %name, creator = %creator.username, "频道已创建");
        Ok(channel)
    }

    /// 校验访问权限并注册一个新连接
    pub async fn join(
        &self,
        channel: &ChannelName,
        identity: &UserIdentity,
    ) -> Result<JoinedConnection, ApplicationError> {
        let _guard = self.lock_channel(channel).await;

        if self.deps.channels.find_by_name(channel).await?.is_none() {
            if !identity.is_moderator() {
                return Err(ApplicationError::AccessDenied {
                    channel: channel.to_string(),
                });
            }
            self.create_channel(channel, identity).await?;
        }

        if self.deps.blocks.find(channel, identity.id).await?.is_some() {
            return Err(ApplicationError::Blocked {
                channel: channel.to_string(),
            });
        }

        if !identity.is_moderator()
            && self
                .deps
                .memberships
                .find(channel, identity.id)
                .await?
                .is_none()
        {
            return Err(ApplicationError::AccessDenied {
                channel: channel.to_string(),
            });
        }

        let (sender, receiver) = mpsc::channel(self.outbound_capacity);
        let handle = ConnectionHandle {
            id: ConnectionId::generate(),
            channel: channel.clone(),
            user_id: identity.id,
            username: identity.username.clone(),
            is_moderator: identity.is_moderator(),
            outbound: sender,
            closed: CancellationToken::new(),
        };

        let connections = self.connections_or_insert(channel).await;
        let members = {
            let mut connections = connections.write().await;
            connections.insert(handle.id, handle.clone());
            usernames(&connections)
        };

        info!(
            channel = %channel,
            connection_id = %handle.id,
            username = %identity.username,
            "连接已加入频道"
        );

        Ok(JoinedConnection {
            handle,
            outbound: receiver,
            members,
        })
    }

    /// 移除连接。返回连接是否仍在注册表中（被强制关闭的连接已经移除）。
    pub async fn leave(&self, channel: &ChannelName, connection_id: ConnectionId) -> bool {
        let Some(connections) = self.connections(channel).await else {
            return false;
        };
        let removed = connections.write().await.remove(&connection_id).is_some();
        if removed {
            debug!(channel = %channel, connection_id = %connection_id, "连接已离开频道");
        }
        removed
    }

    /// 把一行文本发送给频道内的所有连接，返回成功放入队列的连接数
    pub async fn broadcast_line(&self, channel: &ChannelName, line: &str) -> usize {
        let Some(connections) = self.connections(channel).await else {
            return 0;
        };
        let connections = connections.read().await;
        connections
            .values()
            .filter(|connection| connection.send_line(line))
            .count()
    }

    /// 强制关闭某个用户在频道内的全部连接
    pub async fn disconnect_user(
        &self,
        channel: &ChannelName,
        username: &Username,
        reason: &str,
    ) -> bool {
        let Some(connections) = self.connections(channel).await else {
            return false;
        };
        let removed: Vec<ConnectionHandle> = {
            let mut connections = connections.write().await;
            let ids: Vec<ConnectionId> = connections
                .values()
                .filter(|connection| &connection.username == username)
                .map(|connection| connection.id)
                .collect();
            ids.iter()
                .filter_map(|id| connections.remove(id))
                .collect()
        };

        for connection in &removed {
            connection.close(reason);
            info!(
                channel = %channel,
                connection_id = %connection.id,
                username = %username,
                "连接被强制关闭"
            );
        }
        !removed.is_empty()
    }

    /// 频道内在线用户名（去重、排序）
    pub async fn members(&self, channel: &ChannelName) -> Vec<Username> {
        match self.connections(channel).await {
            Some(connections) => usernames(&*connections.read().await),
            None => Vec::new(),
        }
    }

    pub async fn is_connected(&self, channel: &ChannelName, username: &Username) -> bool {
        match self.connections(channel).await {
            Some(connections) => connections
                .read()
                .await
                .values()
                .any(|connection| &connection.username == username),
            None => false,
        }
    }

    pub async fn connection_count(&self, channel: &ChannelName) -> usize {
        match self.connections(channel).await {
            Some(connections) => connections.read().await.len(),
            None => 0,
        }
    }

    async fn connections(&self, channel: &ChannelName) -> Option<ChannelConnections> {
        self.live.read().await.get(channel).cloned()
    }

    async fn connections_or_insert(&self, channel: &ChannelName) -> ChannelConnections {
        if let Some(existing) = self.connections(channel).await {
            return existing;
        }
        let mut live = self.live.write().await;
        live.entry(channel.clone())
            .or_insert_with(|| Arc::new(RwLock::new(HashMap::new())))
            .clone()
    }
}

fn usernames(connections: &HashMap<ConnectionId, ConnectionHandle>) -> Vec<Username> {
    let mut names: Vec<Username> = connections
        .values()
        .map(|connection| connection.username.clone())
        .collect();
    names.sort();
    names.dedup();
    names
}

#[async_trait]
impl MessageBroadcaster for ChannelRegistry {
    async fn broadcast(&self, payload: MessageBroadcast) -> usize {
        self.broadcast_line(&payload.channel, &payload.line).await
    }
}
