//! 进程内消息缓冲
//!
//! 消费者收到的事件先进入缓冲，达到批量阈值或定时器触发时整批写入存储。
//! 刷新先拍快照再写库，成功后才从缓冲头部移除已写入的部分；失败时缓冲保持原样。

use domain::{ChannelName, ChatEvent};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::ApplicationError;
use crate::repository::ChatEventStore;

#[derive(Default)]
pub struct MessageBuffer {
    events: Mutex<Vec<ChatEvent>>,
    flush_lock: Mutex<()>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加事件，返回追加后的长度
    pub async fn push(&self, event: ChatEvent) -> usize {
        let mut events = self.events.lock().await;
        events.push(event);
        events.len()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<ChatEvent> {
        self.events.lock().await.clone()
    }

    /// 某个频道尚未写入存储的事件
    pub async fn snapshot_channel(&self, channel: &ChannelName) -> Vec<ChatEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| &event.channel == channel)
            .cloned()
            .collect()
    }

    pub async fn last_sequence(&self, channel: &ChannelName) -> Option<u64> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| &event.channel == channel)
            .map(|event| event.sequence_number)
            .max()
    }

    /// 把缓冲整批写入存储，返回写入的事件数
    pub async fn flush_to(&self, store: &dyn ChatEventStore) -> Result<usize, ApplicationError> {
        let _flushing = self.flush_lock.lock().await;

        let batch = self.snapshot().await;
        if batch.is_empty() {
            return Ok(0);
        }

        match store.append_events(&batch).await {
            Ok(inserted) => {
                // 刷新期间新到的事件排在快照之后，只移除快照部分
                self.events.lock().await.drain(..batch.len());
                info!(
                    count = batch.len(),
                    inserted,
                    "缓冲事件已写入存储"
                );
                Ok(batch.len())
            }
            Err(err) => {
                error!(count = batch.len(), error = %err, "缓冲事件写入存储失败");
                Err(ApplicationError::Storage(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEventStore;
    use crate::repository::MockChatEventStore;
    use chrono::Utc;
    use domain::{ChatEventKind, RepositoryError, Username};

    fn event(channel: &str, sequence: u64) -> ChatEvent {
        ChatEvent::new(
            ChannelName::parse(channel).unwrap(),
            sequence,
            ChatEventKind::Message {
                username: Username::parse("bob").unwrap(),
                text: format!("m{sequence}"),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn failed_flush_leaves_buffer_unchanged() {
        let buffer = MessageBuffer::new();
        for sequence in 0..3 {
            buffer.push(event("general", sequence)).await;
        }
        let before = buffer.snapshot().await;

        let mut store = MockChatEventStore::new();
        store
            .expect_append_events()
            .times(1)
            .returning(|_| Err(RepositoryError::storage("connection reset")));

        let result = buffer.flush_to(&store).await;
        assert!(matches!(result, Err(ApplicationError::Storage(_))));
        assert_eq!(buffer.snapshot().await, before);
    }

    #[tokio::test]
    async fn successful_flush_drains_buffer() {
        let buffer = MessageBuffer::new();
        let store = MemoryEventStore::new();
        buffer.push(event("general", 0)).await;
        buffer.push(event("random", 0)).await;

        assert_eq!(buffer.flush_to(&store).await.unwrap(), 2);
        assert!(buffer.is_empty().await);
        assert_eq!(store.len().await, 2);
        assert_eq!(buffer.flush_to(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn channel_views_filter_by_channel() {
        let buffer = MessageBuffer::new();
        buffer.push(event("general", 3)).await;
        buffer.push(event("random", 9)).await;
        buffer.push(event("general", 4)).await;

        let general = ChannelName::parse("general").unwrap();
        let sequences: Vec<u64> = buffer
            .snapshot_channel(&general)
            .await
            .iter()
            .map(|event| event.sequence_number)
            .collect();
        assert_eq!(sequences, vec![3, 4]);
        assert_eq!(buffer.last_sequence(&general).await, Some(4));
    }
}
