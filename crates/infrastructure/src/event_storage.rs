//! 事件的 PostgreSQL 存储
//!
//! 批量写入在一个事务中完成；事件 id 是主键，重复投递的事件被 `ON CONFLICT DO NOTHING` 跳过。

use application::ChatEventStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ChannelName, ChatEvent, EventId, RepositoryError};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::repository::{invalid_data, map_sqlx_err};

/// 每条 INSERT 语句的最大行数，9 列 × 1000 行远低于 65535 个绑定参数的上限
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, FromRow)]
struct EventRecord {
    id: Uuid,
    channel: String,
    sequence_number: i64,
    action: String,
    username: String,
    time: DateTime<Utc>,
    message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRecord> for ChatEvent {
    type Error = RepositoryError;

    fn try_from(value: EventRecord) -> Result<Self, Self::Error> {
        let sequence = u64::try_from(value.sequence_number)
            .map_err(|_| invalid_data(format!("negative sequence {}", value.sequence_number)))?;
        ChatEvent::from_record(
            EventId::from(value.id),
            &value.action,
            &value.username,
            &value.channel,
            value.time,
            sequence,
            value.message,
            value.created_at,
            value.updated_at,
        )
        .map_err(|err| invalid_data(err.to_string()))
    }
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 检查数据库连接是否正常
    pub async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

fn sequence_to_i64(sequence: u64) -> Result<i64, RepositoryError> {
    i64::try_from(sequence)
        .map_err(|_| invalid_data(format!("sequence {sequence} overflows BIGINT")))
}

#[async_trait]
impl ChatEventStore for PgEventStore {
    async fn append_events(&self, events: &[ChatEvent]) -> Result<u64, RepositoryError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let mut inserted = 0;

        for chunk in events.chunks(INSERT_CHUNK) {
            let sequences = chunk
                .iter()
                .map(|event| sequence_to_i64(event.sequence_number))
                .collect::<Result<Vec<_>, _>>()?;

            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO chat_events (id, channel, sequence_number, action, username, time, message, created_at, updated_at) ",
            );
            query_builder.push_values(chunk.iter().zip(sequences), |mut b, (event, sequence)| {
                b.push_bind(Uuid::from(event.id))
                    .push_bind(event.channel.as_str())
                    .push_bind(sequence)
                    .push_bind(event.action())
                    .push_bind(event.username().as_str())
                    .push_bind(event.time)
                    .push_bind(event.text())
                    .push_bind(event.created_at)
                    .push_bind(event.updated_at);
            });
            query_builder.push(" ON CONFLICT (id) DO NOTHING");

            let result = query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_err)?;

        tracing::info!(
            batch_size = events.len(),
            inserted,
            "Successfully inserted chat events batch"
        );
        Ok(inserted)
    }

    async fn events_ordered(
        &self,
        channel: &ChannelName,
    ) -> Result<Vec<ChatEvent>, RepositoryError> {
        let records = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT id, channel, sequence_number, action, username, time, message, created_at, updated_at
            FROM chat_events
            WHERE channel = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(channel.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatEvent::try_from).collect()
    }

    async fn max_sequence(&self, channel: &ChannelName) -> Result<Option<u64>, RepositoryError> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence_number) FROM chat_events WHERE channel = $1")
                .bind(channel.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(max.and_then(|value| u64::try_from(value).ok()))
    }
}
