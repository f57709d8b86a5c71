use std::sync::Arc;

use domain::{ChannelName, ChatEvent, ChatEventKind};
use tracing::debug;

use crate::broadcaster::{render, LiveBroadcaster};
use crate::clock::Clock;
use crate::publisher::EventPublisher;
use crate::sequencer::SequenceAllocator;

/// 事件处理流水线：分配序列号 → 实时广播 → 持久化发布。
///
/// 发布失败只记录日志，不影响实时路径。
pub struct EventPipeline {
    sequencer: Arc<SequenceAllocator>,
    broadcaster: LiveBroadcaster,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
}

impl EventPipeline {
    pub fn new(
        sequencer: Arc<SequenceAllocator>,
        broadcaster: LiveBroadcaster,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sequencer,
            broadcaster,
            publisher,
            clock,
        }
    }

    pub async fn emit(&self, channel: &ChannelName, kind: ChatEventKind) -> ChatEvent {
        self.emit_rendered(channel, kind, render).await
    }

    /// 与 `emit` 相同，但使用自定义的展示文本
    pub async fn emit_rendered(
        &self,
        channel: &ChannelName,
        kind: ChatEventKind,
        render: fn(&ChatEvent) -> String,
    ) -> ChatEvent {
        let sequence = self.sequencer.next(channel).await;
        let event = ChatEvent::new(channel.clone(), sequence, kind, self.clock.now());

        let delivered = self
            .broadcaster
            .deliver_line(channel, render(&event))
            .await;
        debug!(
            channel = %channel,
            sequence,
            action = event.action(),
            delivered,
            "事件已广播"
        );

        // 错误已在发布器内记录
        let _ = self.publisher.publish(&event).await;
        event
    }
}
