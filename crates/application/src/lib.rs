//! 应用层实现。
//!
//! 频道注册、序列号分配、管理命令、实时广播、持久化发布与批量写库，
//! 以及对外部适配器（存储、消息队列）的抽象。

pub mod broadcaster;
pub mod buffer;
pub mod clock;
pub mod consumer;
pub mod error;
pub mod history;
pub mod locks;
pub mod memory;
pub mod moderation;
pub mod pipeline;
pub mod publisher;
pub mod registry;
pub mod relay;
pub mod repository;
pub mod sequencer;
pub mod session;

#[cfg(test)]
mod test_support;

pub use broadcaster::{LiveBroadcaster, MessageBroadcast, MessageBroadcaster};
pub use buffer::MessageBuffer;
pub use clock::{Clock, SystemClock};
pub use consumer::{BatchingConsumer, ConsumerSettings, DeliveryOutcome, DurableConsumer};
pub use error::{ApplicationError, ApplicationResult};
pub use history::HistoryAssembler;
pub use memory::{MemoryDirectory, MemoryEventStore};
pub use moderation::{ModerationDependencies, ModerationService};
pub use pipeline::EventPipeline;
pub use publisher::{
    memory::MemoryBroker, Acker, BrokerError, Delivery, DeliveryStream, EventBroker,
    EventPublisher,
};
pub use registry::{
    ChannelRegistry, ChannelRegistryDependencies, ConnectionHandle, ConnectionId,
    JoinedConnection,
};
pub use relay::{ChatRelay, RelaySettings, RelayStores};
pub use repository::{
    BlockRepository, ChannelRepository, ChatEventStore, MembershipRepository, UserDirectory,
};
pub use sequencer::{SequenceAllocator, SequenceSource};
pub use session::{ChatSession, OpenedSession, SessionDependencies, SessionManager};
