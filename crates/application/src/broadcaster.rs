use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChannelName, ChatEvent, ChatEventKind, Timestamp};
use tracing::debug;

/// 发往一个频道的一行展示文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBroadcast {
    pub channel: ChannelName,
    pub line: String,
}

#[async_trait]
pub trait MessageBroadcaster: Send + Sync {
    /// 返回成功投递的连接数
    async fn broadcast(&self, payload: MessageBroadcast) -> usize;
}

/// 把事件渲染成展示行并扇出给频道内的在线连接
#[derive(Clone)]
pub struct LiveBroadcaster {
    target: Arc<dyn MessageBroadcaster>,
}

impl LiveBroadcaster {
    pub fn new(target: Arc<dyn MessageBroadcaster>) -> Self {
        Self { target }
    }

    pub async fn deliver(&self, event: &ChatEvent) -> usize {
        self.deliver_line(&event.channel, render(event)).await
    }

    pub async fn deliver_line(&self, channel: &ChannelName, line: String) -> usize {
        let delivered = self
            .target
            .broadcast(MessageBroadcast {
                channel: channel.clone(),
                line,
            })
            .await;
        debug!(channel = %channel, delivered, "广播完成");
        delivered
    }
}

/// `HH:MM`，UTC
pub fn clock_prefix(time: &Timestamp) -> String {
    format!("[{}]", time.format("%H:%M"))
}

/// 带时间前缀的状态行
pub fn status_line(time: &Timestamp, text: &str) -> String {
    format!("{} {}", clock_prefix(time), text)
}

pub fn render(event: &ChatEvent) -> String {
    let prefix = clock_prefix(&event.time);
    match &event.kind {
        ChatEventKind::Message { username, text } => format!("{prefix} {username}: {text}"),
        ChatEventKind::Connect { username } => format!("{prefix} {username} joined the channel"),
        ChatEventKind::Disconnect { username } => format!("{prefix} {username} left the channel"),
        ChatEventKind::Invited { username } => format!("{prefix} {username} was invited"),
        ChatEventKind::Blocked { username } => format!("{prefix} {username} was blocked"),
        ChatEventKind::Unblocked { username } => format!("{prefix} {username} was unblocked"),
    }
}

/// 被踢出同样记录为 `disconnect` 事件，只是展示文本不同
pub fn render_kick(event: &ChatEvent) -> String {
    format!("{} {} was kicked", clock_prefix(&event.time), event.username())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use domain::Username;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Captured(Mutex<Vec<MessageBroadcast>>);

    #[async_trait]
    impl MessageBroadcaster for Captured {
        async fn broadcast(&self, payload: MessageBroadcast) -> usize {
            self.0.lock().await.push(payload);
            1
        }
    }

    fn event(kind: ChatEventKind) -> ChatEvent {
        let time = chrono::Utc.with_ymd_and_hms(2024, 11, 24, 9, 5, 30).unwrap();
        ChatEvent::new(ChannelName::parse("general").unwrap(), 0, kind, time)
    }

    fn bob() -> Username {
        Username::parse("bob").unwrap()
    }

    #[test]
    fn renders_messages_and_notices() {
        let message = event(ChatEventKind::Message {
            username: bob(),
            text: "hello".into(),
        });
        assert_eq!(render(&message), "[09:05] bob: hello");
        assert_eq!(
            render(&event(ChatEventKind::Connect { username: bob() })),
            "[09:05] bob joined the channel"
        );
        assert_eq!(
            render(&event(ChatEventKind::Disconnect { username: bob() })),
            "[09:05] bob left the channel"
        );
        assert_eq!(
            render(&event(ChatEventKind::Blocked { username: bob() })),
            "[09:05] bob was blocked"
        );
        assert_eq!(
            render_kick(&event(ChatEventKind::Disconnect { username: bob() })),
            "[09:05] bob was kicked"
        );
    }

    #[tokio::test]
    async fn deliver_sends_rendered_line_to_channel() {
        let captured = Arc::new(Captured::default());
        let broadcaster = LiveBroadcaster::new(captured.clone());

        let delivered = broadcaster
            .deliver(&event(ChatEventKind::Invited { username: bob() }))
            .await;

        assert_eq!(delivered, 1);
        let lines = captured.0.lock().await;
        assert_eq!(lines[0].channel.as_str(), "general");
        assert_eq!(lines[0].line, "[09:05] bob was invited");
    }
}
