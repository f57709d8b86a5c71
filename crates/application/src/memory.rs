//! 内存版存储实现，用于测试和单机开发模式。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::{
    Block, Channel, ChannelName, ChatEvent, EventId, Membership, RepositoryError, UserId,
    UserIdentity, Username,
};
use tokio::sync::RwLock;

use crate::repository::{
    BlockRepository, ChannelRepository, ChatEventStore, MembershipRepository, UserDirectory,
};

#[derive(Default)]
struct DirectoryState {
    users: HashMap<UserId, UserIdentity>,
    channels: HashMap<ChannelName, Channel>,
    memberships: HashMap<(ChannelName, UserId), Membership>,
    blocks: HashMap<(ChannelName, UserId), Block>,
}

/// 用户、频道、成员关系和封禁共用一把锁，封禁/解封天然是原子的。
#[derive(Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserIdentity) {
        self.state.write().await.users.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserIdentity>, RepositoryError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(
        &self,
        username: &Username,
    ) -> Result<Option<UserIdentity>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|user| &user.username == username)
            .cloned())
    }
}

#[async_trait]
impl ChannelRepository for MemoryDirectory {
    async fn find_by_name(&self, name: &ChannelName) -> Result<Option<Channel>, RepositoryError> {
        Ok(self.state.read().await.channels.get(name).cloned())
    }

    async fn create_if_absent(&self, channel: Channel) -> Result<Channel, RepositoryError> {
        let mut state = self.state.write().await;
        let stored = state
            .channels
            .entry(channel.name.clone())
            .or_insert(channel);
        Ok(stored.clone())
    }

    async fn list_names(&self) -> Result<Vec<ChannelName>, RepositoryError> {
        let state = self.state.read().await;
        let mut names: Vec<ChannelName> = state.channels.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl MembershipRepository for MemoryDirectory {
    async fn find(
        &self,
        channel: &ChannelName,
        user_id: UserId,
    ) -> Result<Option<Membership>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.memberships.get(&(channel.clone(), user_id)).cloned())
    }

    async fn upsert(&self, membership: Membership) -> Result<Membership, RepositoryError> {
        let mut state = self.state.write().await;
        let key = (membership.channel.clone(), membership.user_id);
        state.memberships.insert(key, membership.clone());
        Ok(membership)
    }
}

#[async_trait]
impl BlockRepository for MemoryDirectory {
    async fn find(
        &self,
        channel: &ChannelName,
        user_id: UserId,
    ) -> Result<Option<Block>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.blocks.get(&(channel.clone(), user_id)).cloned())
    }

    async fn block(&self, block: Block) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let key = (block.channel.clone(), block.user_id);
        state.memberships.remove(&key);
        state.blocks.insert(key, block);
        Ok(())
    }

    async fn unblock(
        &self,
        channel: &ChannelName,
        user_id: UserId,
        restored: Membership,
    ) -> Result<Option<Block>, RepositoryError> {
        let mut state = self.state.write().await;
        let key = (channel.clone(), user_id);
        let Some(block) = state.blocks.remove(&key) else {
            return Ok(None);
        };
        state.memberships.insert(key, restored);
        Ok(Some(block))
    }
}

#[derive(Default)]
struct EventState {
    events: Vec<ChatEvent>,
    ids: HashSet<EventId>,
}

/// 内存事件存储。按事件 id 去重，与数据库的 `ON CONFLICT (id) DO NOTHING` 一致。
#[derive(Default)]
pub struct MemoryEventStore {
    state: RwLock<EventState>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ChatEventStore for MemoryEventStore {
    async fn append_events(&self, events: &[ChatEvent]) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for event in events {
            if state.ids.insert(event.id) {
                state.events.push(event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn events_ordered(
        &self,
        channel: &ChannelName,
    ) -> Result<Vec<ChatEvent>, RepositoryError> {
        let state = self.state.read().await;
        let mut events: Vec<ChatEvent> = state
            .events
            .iter()
            .filter(|event| &event.channel == channel)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.sequence_number);
        Ok(events)
    }

    async fn max_sequence(&self, channel: &ChannelName) -> Result<Option<u64>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|event| &event.channel == channel)
            .map(|event| event.sequence_number)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{ChannelId, ChatEventKind, UserRole};
    use uuid::Uuid;

    fn general() -> ChannelName {
        ChannelName::parse("general").unwrap()
    }

    #[tokio::test]
    async fn block_and_unblock_swap_membership_atomically() {
        let directory = MemoryDirectory::new();
        let user = UserIdentity::new(
            UserId::new(Uuid::new_v4()),
            Username::parse("bob").unwrap(),
            UserRole::User,
        );
        directory
            .upsert(Membership::new(general(), user.id, Utc::now()))
            .await
            .unwrap();

        directory
            .block(Block::new(general(), user.username.clone(), user.id, Utc::now()))
            .await
            .unwrap();
        assert!(MembershipRepository::find(&directory, &general(), user.id)
            .await
            .unwrap()
            .is_none());
        assert!(BlockRepository::find(&directory, &general(), user.id)
            .await
            .unwrap()
            .is_some());

        let restored = Membership::new(general(), user.id, Utc::now());
        let removed = directory
            .unblock(&general(), user.id, restored)
            .await
            .unwrap();
        assert!(removed.is_some());
        assert!(MembershipRepository::find(&directory, &general(), user.id)
            .await
            .unwrap()
            .is_some());

        let again = Membership::new(general(), user.id, Utc::now());
        assert!(directory
            .unblock(&general(), user.id, again)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn create_if_absent_keeps_first_channel() {
        let directory = MemoryDirectory::new();
        let owner = UserId::new(Uuid::new_v4());
        let first = Channel::new(ChannelId::new(Uuid::new_v4()), general(), owner, Utc::now());
        let second = Channel::new(ChannelId::new(Uuid::new_v4()), general(), owner, Utc::now());

        directory.create_if_absent(first.clone()).await.unwrap();
        let stored = directory.create_if_absent(second).await.unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(directory.list_names().await.unwrap(), vec![general()]);
    }

    #[tokio::test]
    async fn event_store_skips_known_ids() {
        let store = MemoryEventStore::new();
        let event = ChatEvent::new(
            general(),
            0,
            ChatEventKind::Connect {
                username: Username::parse("bob").unwrap(),
            },
            Utc::now(),
        );

        assert_eq!(store.append_events(&[event.clone()]).await.unwrap(), 1);
        assert_eq!(store.append_events(&[event]).await.unwrap(), 0);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.max_sequence(&general()).await.unwrap(), Some(0));
    }
}
