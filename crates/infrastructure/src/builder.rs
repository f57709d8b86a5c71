use std::sync::Arc;

use application::{
    BrokerError, EventBroker, MemoryBroker, MemoryDirectory, MemoryEventStore, RelayStores,
};
use config::{AppConfig, BrokerBackend};
use thiserror::Error;
use tracing::info;

use crate::{
    event_storage::PgEventStore,
    migrations::MIGRATOR,
    redis_streams::{RedisStreamBroker, RedisStreamSettings},
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// 根据配置选出的存储与队列后端
pub struct Infrastructure {
    pub stores: RelayStores,
    pub broker: Arc<dyn EventBroker>,
    /// 内存模式下的用户目录，允许按令牌声明登记用户
    pub memory_directory: Option<Arc<MemoryDirectory>>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let broker: Arc<dyn EventBroker> = match config.broker.backend {
            BrokerBackend::Redis => {
                let settings = RedisStreamSettings::from_config(&config.redis);
                Arc::new(RedisStreamBroker::connect(settings).await?)
            }
            BrokerBackend::Memory => {
                info!("使用内存队列，进程退出后未写库的事件会丢失");
                Arc::new(MemoryBroker::new())
            }
        };

        if config.database.is_memory() {
            info!("使用内存存储");
            let directory = Arc::new(MemoryDirectory::new());
            return Ok(Self {
                stores: RelayStores::in_memory(directory.clone(), Arc::new(MemoryEventStore::new())),
                broker,
                memory_directory: Some(directory),
            });
        }

        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        info!("数据库迁移完成");

        let storage = Arc::new(PgStorage::new(pool.clone()));
        let stores = RelayStores {
            users: storage.clone(),
            channels: storage.clone(),
            memberships: storage.clone(),
            blocks: storage,
            events: Arc::new(PgEventStore::new(pool)),
        };

        Ok(Self {
            stores,
            broker,
            memory_directory: None,
        })
    }

    /// 全内存后端
    pub fn in_memory() -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        Self {
            stores: RelayStores::in_memory(directory.clone(), Arc::new(MemoryEventStore::new())),
            broker: Arc::new(MemoryBroker::new()),
            memory_directory: Some(directory),
        }
    }
}
