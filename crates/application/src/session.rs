//! 单个连接的会话处理
//!
//! 连接建立后依次处理客户端发来的每一行：聊天内容走事件流水线，管理命令交给 `ModerationService`。

use std::sync::Arc;

use domain::{ChannelName, ChatEvent, ChatEventKind, InboundLine, UserIdentity};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcaster::status_line;
use crate::clock::Clock;
use crate::consumer::DurableConsumer;
use crate::error::ApplicationError;
use crate::moderation::ModerationService;
use crate::pipeline::EventPipeline;
use crate::registry::{ChannelRegistry, ConnectionHandle};

pub struct SessionDependencies {
    pub registry: Arc<ChannelRegistry>,
    pub moderation: Arc<ModerationService>,
    pub pipeline: Arc<EventPipeline>,
    pub consumers: Arc<DurableConsumer>,
    pub clock: Arc<dyn Clock>,
}

/// 已加入频道的会话
pub struct ChatSession {
    pub identity: UserIdentity,
    pub connection: ConnectionHandle,
}

impl ChatSession {
    pub fn channel(&self) -> &ChannelName {
        &self.connection.channel
    }
}

pub struct OpenedSession {
    pub session: ChatSession,
    /// 发往客户端的文本行
    pub outbound: mpsc::Receiver<String>,
}

pub struct SessionManager {
    deps: SessionDependencies,
}

impl SessionManager {
    pub fn new(deps: SessionDependencies) -> Self {
        Self { deps }
    }

    /// 加入频道并广播加入通知
    pub async fn connect(
        &self,
        identity: UserIdentity,
        channel: &ChannelName,
    ) -> Result<OpenedSession, ApplicationError> {
        let joined = self.deps.registry.join(channel, &identity).await?;

        if let Err(err) = self.deps.consumers.ensure_channel(channel).await {
            warn!(channel = %channel, error = %err, "启动频道消费任务失败");
        }

        let kind = ChatEventKind::Connect {
            username: identity.username.clone(),
        };
        self.deps.pipeline.emit(channel, kind).await;

        let online = joined
            .members
            .iter()
            .map(|name| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        joined.handle.send_line(status_line(
            &self.deps.clock.now(),
            &format!("Welcome to {channel}. Online: {online}"),
        ));

        Ok(OpenedSession {
            session: ChatSession {
                identity,
                connection: joined.handle,
            },
            outbound: joined.outbound,
        })
    }

    /// 处理一行输入。失败时已向该连接发送状态行。
    pub async fn handle_line(
        &self,
        session: &ChatSession,
        line: &str,
    ) -> Result<Option<ChatEvent>, ApplicationError> {
        let result = self.dispatch(session, line).await;
        if let Err(err) = &result {
            debug!(
                channel = %session.channel(),
                username = %session.identity.username,
                error = %err,
                "命令执行失败"
            );
            session
                .connection
                .send_line(status_line(&self.deps.clock.now(), &format!("Error: {err}")));
        }
        result
    }

    async fn dispatch(
        &self,
        session: &ChatSession,
        line: &str,
    ) -> Result<Option<ChatEvent>, ApplicationError> {
        match InboundLine::parse(line)? {
            InboundLine::Empty => Ok(None),
            InboundLine::Chat(text) => {
                let kind = ChatEventKind::Message {
                    username: session.identity.username.clone(),
                    text,
                };
                Ok(Some(self.deps.pipeline.emit(session.channel(), kind).await))
            }
            InboundLine::Command { action, target } => {
                let event = self
                    .deps
                    .moderation
                    .execute(&session.identity, session.channel(), action, &target)
                    .await?;
                Ok(Some(event))
            }
        }
    }

    /// 连接结束。只有仍在注册表中的连接（主动断开）才会产生 `disconnect` 事件。
    pub async fn disconnect(&self, session: &ChatSession) -> bool {
        let channel = session.channel();
        let removed = self
            .deps
            .registry
            .leave(channel, session.connection.id)
            .await;
        if removed {
            let kind = ChatEventKind::Disconnect {
                username: session.identity.username.clone(),
            };
            self.deps.pipeline.emit(channel, kind).await;
            info!(channel = %channel, username = %session.identity.username, "用户离开频道");
        }
        removed
    }
}
