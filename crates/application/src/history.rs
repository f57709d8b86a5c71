use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChannelName, ChatEvent};
use tracing::debug;

use crate::buffer::MessageBuffer;
use crate::error::ApplicationError;
use crate::repository::ChatEventStore;
use crate::sequencer::SequenceSource;

/// 合并已持久化的事件和仍在缓冲中的事件
pub struct HistoryAssembler {
    store: Arc<dyn ChatEventStore>,
    buffer: Arc<MessageBuffer>,
}

impl HistoryAssembler {
    pub fn new(store: Arc<dyn ChatEventStore>, buffer: Arc<MessageBuffer>) -> Self {
        Self { store, buffer }
    }

    /// 频道完整历史，按序列号升序。
    ///
    /// 先拍缓冲快照再读存储：两次读取之间完成的刷新会让事件同时出现在两边（重复），
    /// 但不会让事件从两边同时消失。结果不去重。
    pub async fn history(&self, channel: &ChannelName) -> Result<Vec<ChatEvent>, ApplicationError> {
        let buffered = self.buffer.snapshot_channel(channel).await;
        let mut events = self.store.events_ordered(channel).await?;
        let persisted = events.len();
        events.extend(buffered);
        events.sort_by_key(|event| event.sequence_number);
        debug!(
            channel = %channel,
            persisted,
            buffered = events.len() - persisted,
            "历史记录已合并"
        );
        Ok(events)
    }
}

#[async_trait]
impl SequenceSource for HistoryAssembler {
    async fn last_sequence(&self, channel: &ChannelName) -> Result<Option<u64>, ApplicationError> {
        let buffered = self.buffer.last_sequence(channel).await;
        let stored = self.store.max_sequence(channel).await?;
        Ok(buffered.max(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEventStore;
    use crate::repository::MockChatEventStore;
    use chrono::Utc;
    use domain::{ChatEventKind, RepositoryError, Username};

    fn general() -> ChannelName {
        ChannelName::parse("general").unwrap()
    }

    fn event(sequence: u64) -> ChatEvent {
        ChatEvent::new(
            general(),
            sequence,
            ChatEventKind::Message {
                username: Username::parse("bob").unwrap(),
                text: format!("m{sequence}"),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn merges_storage_and_buffer_by_sequence() {
        let store = Arc::new(MemoryEventStore::new());
        let buffer = Arc::new(MessageBuffer::new());
        store
            .append_events(&[event(0), event(1), event(2)])
            .await
            .unwrap();
        buffer.push(event(4)).await;
        buffer.push(event(3)).await;

        let assembler = HistoryAssembler::new(store, buffer);
        let sequences: Vec<u64> = assembler
            .history(&general())
            .await
            .unwrap()
            .iter()
            .map(|event| event.sequence_number)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(assembler.last_sequence(&general()).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn does_not_deduplicate_events_seen_in_both_places() {
        let store = Arc::new(MemoryEventStore::new());
        let buffer = Arc::new(MessageBuffer::new());
        let shared = event(0);
        store.append_events(&[shared.clone()]).await.unwrap();
        buffer.push(shared).await;

        let history = HistoryAssembler::new(store, buffer)
            .history(&general())
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn storage_failure_is_reported() {
        let mut store = MockChatEventStore::new();
        store
            .expect_events_ordered()
            .returning(|_| Err(RepositoryError::storage("timeout")));

        let result = HistoryAssembler::new(Arc::new(store), Arc::new(MessageBuffer::new()))
            .history(&general())
            .await;
        assert!(matches!(result, Err(ApplicationError::Storage(_))));
    }
}
