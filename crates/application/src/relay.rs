//! 组件装配
//!
//! 把存储、队列后端和配置组装成一组共享的服务对象，供 web-api 和集成测试使用。

use std::sync::Arc;

use tracing::info;

use crate::broadcaster::LiveBroadcaster;
use crate::buffer::MessageBuffer;
use crate::clock::Clock;
use crate::consumer::{BatchingConsumer, ConsumerSettings, DurableConsumer};
use crate::error::ApplicationError;
use crate::history::HistoryAssembler;
use crate::memory::{MemoryDirectory, MemoryEventStore};
use crate::moderation::{ModerationDependencies, ModerationService};
use crate::pipeline::EventPipeline;
use crate::publisher::{EventBroker, EventPublisher};
use crate::registry::{ChannelRegistry, ChannelRegistryDependencies, DEFAULT_OUTBOUND_CAPACITY};
use crate::repository::{
    BlockRepository, ChannelRepository, ChatEventStore, MembershipRepository, UserDirectory,
};
use crate::sequencer::SequenceAllocator;
use crate::session::{SessionDependencies, SessionManager};

#[derive(Clone)]
pub struct RelayStores {
    pub users: Arc<dyn UserDirectory>,
    pub channels: Arc<dyn ChannelRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub blocks: Arc<dyn BlockRepository>,
    pub events: Arc<dyn ChatEventStore>,
}

impl RelayStores {
    pub fn in_memory(directory: Arc<MemoryDirectory>, events: Arc<MemoryEventStore>) -> Self {
        Self {
            users: directory.clone(),
            channels: directory.clone(),
            memberships: directory.clone(),
            blocks: directory,
            events,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub consumer: ConsumerSettings,
    pub outbound_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            consumer: ConsumerSettings::default(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

pub struct ChatRelay {
    pub users: Arc<dyn UserDirectory>,
    pub channels: Arc<dyn ChannelRepository>,
    pub registry: Arc<ChannelRegistry>,
    pub moderation: Arc<ModerationService>,
    pub sessions: Arc<SessionManager>,
    pub history: Arc<HistoryAssembler>,
    pub consumers: Arc<DurableConsumer>,
    pub buffer: Arc<MessageBuffer>,
}

impl ChatRelay {
    pub fn new(
        stores: RelayStores,
        broker: Arc<dyn EventBroker>,
        settings: RelaySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(ChannelRegistry::with_capacity(
            ChannelRegistryDependencies {
                channels: stores.channels.clone(),
                memberships: stores.memberships.clone(),
                blocks: stores.blocks.clone(),
                clock: clock.clone(),
            },
            settings.outbound_capacity,
        ));

        let buffer = Arc::new(MessageBuffer::new());
        let history = Arc::new(HistoryAssembler::new(stores.events.clone(), buffer.clone()));
        let sequencer = Arc::new(SequenceAllocator::with_source(history.clone()));

        let pipeline = Arc::new(EventPipeline::new(
            sequencer,
            LiveBroadcaster::new(registry.clone()),
            EventPublisher::new(broker.clone()),
            clock.clone(),
        ));

        let moderation = Arc::new(ModerationService::new(ModerationDependencies {
            users: stores.users.clone(),
            memberships: stores.memberships.clone(),
            blocks: stores.blocks.clone(),
            registry: registry.clone(),
            pipeline: pipeline.clone(),
            clock: clock.clone(),
        }));

        let batching = Arc::new(BatchingConsumer::new(
            buffer.clone(),
            stores.events.clone(),
            settings.consumer,
        ));
        let consumers = Arc::new(DurableConsumer::new(batching, broker));

        let sessions = Arc::new(SessionManager::new(SessionDependencies {
            registry: registry.clone(),
            moderation: moderation.clone(),
            pipeline,
            consumers: consumers.clone(),
            clock,
        }));

        Self {
            users: stores.users,
            channels: stores.channels,
            registry,
            moderation,
            sessions,
            history,
            consumers,
            buffer,
        }
    }

    /// 启动刷新定时器和已有频道的消费任务
    pub async fn start(&self) -> Result<(), ApplicationError> {
        self.consumers.start(self.channels.as_ref()).await?;
        info!("聊天中继已启动");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.consumers.shutdown().await;
    }
}
