//! 聊天中继核心领域模型
//!
//! 包含用户身份、频道、成员关系、封禁记录与频道事件，以及客户端输入行的解析规则。

pub mod channel;
pub mod command;
pub mod errors;
pub mod events;
pub mod user;
pub mod value_objects;

pub use channel::{Block, Channel, Membership};
pub use command::{InboundLine, ModerationAction};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use events::{ChatEvent, ChatEventKind};
pub use user::{UserIdentity, UserRole};
pub use value_objects::{ChannelId, ChannelName, EventId, Timestamp, UserId, Username};
