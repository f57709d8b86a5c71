use crate::value_objects::{ChannelId, ChannelName, Timestamp, UserId, Username};

/// 聊天频道
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: ChannelName,
    pub owner_id: UserId,
    pub created_at: Timestamp,
}

impl Channel {
    pub fn new(id: ChannelId, name: ChannelName, owner_id: UserId, created_at: Timestamp) -> Self {
        Self {
            id,
            name,
            owner_id,
            created_at,
        }
    }
}

/// 成员关系：允许某个用户连接到频道。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Membership {
    pub channel: ChannelName,
    pub user_id: UserId,
    pub joined_at: Timestamp,
}

impl Membership {
    pub fn new(channel: ChannelName, user_id: UserId, joined_at: Timestamp) -> Self {
        Self {
            channel,
            user_id,
            joined_at,
        }
    }
}

/// 封禁记录。与同一 (频道, 用户) 的 `Membership` 互斥。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub channel: ChannelName,
    pub username: Username,
    pub user_id: UserId,
    pub blocked_at: Timestamp,
}

impl Block {
    pub fn new(
        channel: ChannelName,
        username: Username,
        user_id: UserId,
        blocked_at: Timestamp,
    ) -> Self {
        Self {
            channel,
            username,
            user_id,
            blocked_at,
        }
    }
}
