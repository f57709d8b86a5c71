use async_trait::async_trait;
use domain::{
    Block, Channel, ChannelName, ChatEvent, Membership, RepositoryError, UserId, UserIdentity,
    Username,
};

/// 用户目录。用户的注册与维护由外部系统负责，这里只读。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserIdentity>, RepositoryError>;
    async fn find_by_username(
        &self,
        username: &Username,
    ) -> Result<Option<UserIdentity>, RepositoryError>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn find_by_name(&self, name: &ChannelName) -> Result<Option<Channel>, RepositoryError>;
    /// 不存在时插入；已存在时返回已有记录
    async fn create_if_absent(&self, channel: Channel) -> Result<Channel, RepositoryError>;
    async fn list_names(&self) -> Result<Vec<ChannelName>, RepositoryError>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn find(
        &self,
        channel: &ChannelName,
        user_id: UserId,
    ) -> Result<Option<Membership>, RepositoryError>;
    async fn upsert(&self, membership: Membership) -> Result<Membership, RepositoryError>;
}

/// 封禁与成员关系互斥，因此封禁和解封都必须在一个事务里同时修改两张表。
#[async_trait]
pub trait BlockRepository: Send + Sync {
    async fn find(
        &self,
        channel: &ChannelName,
        user_id: UserId,
    ) -> Result<Option<Block>, RepositoryError>;
    /// 删除成员关系并写入封禁
    async fn block(&self, block: Block) -> Result<(), RepositoryError>;
    /// 删除封禁并恢复成员关系；没有封禁记录时不做任何修改并返回 `None`
    async fn unblock(
        &self,
        channel: &ChannelName,
        user_id: UserId,
        restored: Membership,
    ) -> Result<Option<Block>, RepositoryError>;
}

/// 事件存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatEventStore: Send + Sync {
    /// 在一个事务中写入整批事件，已存在的事件 id 会被跳过。返回实际写入的行数。
    async fn append_events(&self, events: &[ChatEvent]) -> Result<u64, RepositoryError>;
    /// 按序列号升序返回频道的全部事件
    async fn events_ordered(
        &self,
        channel: &ChannelName,
    ) -> Result<Vec<ChatEvent>, RepositoryError>;
    async fn max_sequence(&self, channel: &ChannelName) -> Result<Option<u64>, RepositoryError>;
}
