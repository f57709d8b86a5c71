use application::broadcaster::status_line;
use application::OpenedSession;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use domain::{ChannelName, UserIdentity};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// 单个 WebSocket 连接
///
/// 写任务把会话的出站文本行转发给客户端，连接被强制关闭时先写完剩余行再发送关闭帧；
/// 读循环把每个文本帧交给会话处理。
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    identity: UserIdentity,
    channel: ChannelName,
}

impl WebSocketConnection {
    pub fn new(
        socket: WebSocket,
        state: AppState,
        identity: UserIdentity,
        channel: ChannelName,
    ) -> Self {
        Self {
            socket,
            state,
            identity,
            channel,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            identity,
            channel,
        } = self;
        let (mut sender, mut incoming) = socket.split();
        let sessions = state.relay.sessions.clone();

        let OpenedSession {
            session,
            mut outbound,
        } = match sessions.connect(identity.clone(), &channel).await {
            Ok(opened) => opened,
            Err(err) => {
                tracing::info!(
                    channel = %channel,
                    username = %identity.username,
                    error = %err,
                    "拒绝 WebSocket 连接"
                );
                let line = status_line(&Utc::now(), &format!("Error: {err}"));
                let _ = sender.send(WsMessage::Text(line.into())).await;
                let _ = sender.send(WsMessage::Close(None)).await;
                return;
            }
        };
        tracing::info!(channel = %channel, username = %identity.username, "WebSocket 连接已建立");

        // pong 与出站文本共用同一个写端
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);
        let closed = session.connection.closed_token();

        let send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(line) = outbound.recv() => {
                        if sender.send(WsMessage::Text(line.into())).await.is_err() {
                            tracing::debug!("发送文本行失败，客户端已断开");
                            break;
                        }
                    }
                    Some(WsCommand::SendPong(data)) = cmd_rx.recv() => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    _ = closed.cancelled() => {
                        while let Ok(line) = outbound.try_recv() {
                            if sender.send(WsMessage::Text(line.into())).await.is_err() {
                                break;
                            }
                        }
                        let _ = sender.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
            tracing::debug!("WebSocket 发送任务结束");
        });

        let stop = session.connection.closed_token();
        loop {
            let message = tokio::select! {
                _ = stop.cancelled() => {
                    tracing::info!(
                        channel = %channel,
                        username = %identity.username,
                        "连接被强制关闭"
                    );
                    break;
                }
                message = incoming.next() => message,
            };

            match message {
                Some(Ok(WsMessage::Text(text))) => {
                    // 失败时会话已经回写了状态行
                    let _ = sessions.handle_line(&session, text.as_str()).await;
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    tracing::debug!("忽略二进制帧");
                }
                Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "读取 WebSocket 帧失败");
                    break;
                }
            }
        }

        sessions.disconnect(&session).await;
        stop.cancel();
        if let Err(err) = send_task.await {
            tracing::warn!(error = %err, "等待发送任务结束失败");
        }
        tracing::info!(channel = %channel, username = %identity.username, "WebSocket 连接已断开");
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}
