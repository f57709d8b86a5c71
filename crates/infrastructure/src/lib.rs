//! 基础设施层实现。
//!
//! 提供 PostgreSQL 存储与 Redis Streams 队列适配器，实现应用层定义的接口。

pub mod builder;
pub mod event_storage;
pub mod migrations;
pub mod redis_streams;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use event_storage::PgEventStore;
pub use migrations::MIGRATOR;
pub use redis_streams::{RedisStreamBroker, RedisStreamSettings};
pub use repository::{create_pg_pool, PgStorage};
