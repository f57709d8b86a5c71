use application::{BlockRepository, ChannelRepository, MembershipRepository, UserDirectory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Block, Channel, ChannelId, ChannelName, Membership, RepositoryError, UserId, UserIdentity,
    UserRole, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

pub(crate) fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    role: String,
}

impl TryFrom<UserRecord> for UserIdentity {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        Ok(UserIdentity::new(
            UserId::from(value.id),
            username,
            UserRole::parse(&value.role),
        ))
    }
}

#[derive(Debug, FromRow)]
struct ChannelRecord {
    id: Uuid,
    name: String,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChannelRecord> for Channel {
    type Error = RepositoryError;

    fn try_from(value: ChannelRecord) -> Result<Self, Self::Error> {
        let name = ChannelName::parse(value.name).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Channel::new(
            ChannelId::from(value.id),
            name,
            UserId::from(value.owner_id),
            value.created_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct MembershipRecord {
    channel: String,
    user_id: Uuid,
    joined_at: DateTime<Utc>,
}

impl TryFrom<MembershipRecord> for Membership {
    type Error = RepositoryError;

    fn try_from(value: MembershipRecord) -> Result<Self, Self::Error> {
        let channel =
            ChannelName::parse(value.channel).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Membership::new(
            channel,
            UserId::from(value.user_id),
            value.joined_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct BlockRecord {
    channel: String,
    user_id: Uuid,
    username: String,
    blocked_at: DateTime<Utc>,
}

impl TryFrom<BlockRecord> for Block {
    type Error = RepositoryError;

    fn try_from(value: BlockRecord) -> Result<Self, Self::Error> {
        let channel =
            ChannelName::parse(value.channel).map_err(|err| invalid_data(err.to_string()))?;
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Block::new(
            channel,
            username,
            UserId::from(value.user_id),
            value.blocked_at,
        ))
    }
}

/// 用户、频道、成员关系和封禁的 PostgreSQL 实现
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 写入或更新用户（供运维脚本与测试使用）
    pub async fn upsert_user(&self, user: &UserIdentity) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET username = EXCLUDED.username, role = EXCLUDED.role
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgStorage {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserIdentity>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, role FROM users WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(UserIdentity::try_from).transpose()
    }

    async fn find_by_username(
        &self,
        username: &Username,
    ) -> Result<Option<UserIdentity>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, role FROM users WHERE username = $1",
        )
        .bind(username.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(UserIdentity::try_from).transpose()
    }
}

#[async_trait]
impl ChannelRepository for PgStorage {
    async fn find_by_name(&self, name: &ChannelName) -> Result<Option<Channel>, RepositoryError> {
        let record = sqlx::query_as::<_, ChannelRecord>(
            "SELECT id, name, owner_id, created_at FROM channels WHERE name = $1",
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Channel::try_from).transpose()
    }

    async fn create_if_absent(&self, channel: Channel) -> Result<Channel, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO channels (id, name, owner_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::from(channel.id))
        .bind(channel.name.as_str())
        .bind(Uuid::from(channel.owner_id))
        .bind(channel.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        self.find_by_name(&channel.name)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_names(&self) -> Result<Vec<ChannelName>, RepositoryError> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM channels ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        names
            .into_iter()
            .map(|name| ChannelName::parse(name).map_err(|err| invalid_data(err.to_string())))
            .collect()
    }
}

#[async_trait]
impl MembershipRepository for PgStorage {
    async fn find(
        &self,
        channel: &ChannelName,
        user_id: UserId,
    ) -> Result<Option<Membership>, RepositoryError> {
        let record = sqlx::query_as::<_, MembershipRecord>(
            r#"
            SELECT channel, user_id, joined_at
            FROM channel_memberships
            WHERE channel = $1 AND user_id = $2
            "#,
        )
        .bind(channel.as_str())
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Membership::try_from).transpose()
    }

    async fn upsert(&self, membership: Membership) -> Result<Membership, RepositoryError> {
        let record = sqlx::query_as::<_, MembershipRecord>(
            r#"
            INSERT INTO channel_memberships (channel, user_id, joined_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (channel, user_id) DO UPDATE SET joined_at = EXCLUDED.joined_at
            RETURNING channel, user_id, joined_at
            "#,
        )
        .bind(membership.channel.as_str())
        .bind(Uuid::from(membership.user_id))
        .bind(membership.joined_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Membership::try_from(record)
    }
}

#[async_trait]
impl BlockRepository for PgStorage {
    async fn find(
        &self,
        channel: &ChannelName,
        user_id: UserId,
    ) -> Result<Option<Block>, RepositoryError> {
        let record = sqlx::query_as::<_, BlockRecord>(
            r#"
            SELECT channel, user_id, username, blocked_at
            FROM channel_blocks
            WHERE channel = $1 AND user_id = $2
            "#,
        )
        .bind(channel.as_str())
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Block::try_from).transpose()
    }

    async fn block(&self, block: Block) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query("DELETE FROM channel_memberships WHERE channel = $1 AND user_id = $2")
            .bind(block.channel.as_str())
            .bind(Uuid::from(block.user_id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO channel_blocks (channel, user_id, username, blocked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (channel, user_id) DO UPDATE SET blocked_at = EXCLUDED.blocked_at
            "#,
        )
        .bind(block.channel.as_str())
        .bind(Uuid::from(block.user_id))
        .bind(block.username.as_str())
        .bind(block.blocked_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn unblock(
        &self,
        channel: &ChannelName,
        user_id: UserId,
        restored: Membership,
    ) -> Result<Option<Block>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let removed = sqlx::query_as::<_, BlockRecord>(
            r#"
            DELETE FROM channel_blocks
            WHERE channel = $1 AND user_id = $2
            RETURNING channel, user_id, username, blocked_at
            "#,
        )
        .bind(channel.as_str())
        .bind(Uuid::from(user_id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let Some(removed) = removed else {
            tx.rollback().await.map_err(map_sqlx_err)?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO channel_memberships (channel, user_id, joined_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (channel, user_id) DO NOTHING
            "#,
        )
        .bind(restored.channel.as_str())
        .bind(Uuid::from(restored.user_id))
        .bind(restored.joined_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Block::try_from(removed).map(Some)
    }
}
