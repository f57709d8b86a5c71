//! 统一配置中心
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//! - 内置默认值（开发环境可直接运行）
//! - 配置文件 `chat-relay.toml`（或 `CHAT_CONFIG_FILE` 指定的路径），不存在时跳过
//! - `CHAT_` 前缀的环境变量，`__` 表示嵌套，例如 `CHAT_CONSUMER__BATCH_SIZE=50`
//! - 约定俗成的 `DATABASE_URL`、`REDIS_URL`、`JWT_SECRET`

use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// `database.url` 取该值时使用内存存储
pub const MEMORY_DATABASE_URL: &str = "memory";

pub const DEFAULT_CONFIG_FILE: &str = "chat-relay.toml";

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub broker: BrokerConfig,
    pub jwt: JwtConfig,
    pub consumer: ConsumerConfig,
    /// `RUST_LOG` 未设置时使用的日志过滤规则
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 每个连接的待发送队列容量
    pub outbound_queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_DATABASE_URL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Redis Streams 消费者组
    pub consumer_group: String,
    /// 本进程在消费者组中的名字
    pub consumer_name: String,
    /// XREADGROUP 的阻塞时间
    pub block_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub max_buffered: usize,
}

impl ConsumerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Default for AppConfig {
    /// 开发环境默认值：内存存储 + 内存队列
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                outbound_queue_capacity: 256,
            },
            database: DatabaseConfig {
                url: MEMORY_DATABASE_URL.to_string(),
                max_connections: 5,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                consumer_group: "chat_relay".to_string(),
                consumer_name: "relay-1".to_string(),
                block_ms: 1000,
            },
            broker: BrokerConfig {
                backend: BrokerBackend::Memory,
            },
            jwt: JwtConfig {
                secret: "change-me-local-development-secret-0001".to_string(),
                expiration_hours: 24,
            },
            consumer: ConsumerConfig {
                batch_size: 100,
                flush_interval_secs: 30,
                max_buffered: 10_000,
            },
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 按默认顺序加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment() -> Figment {
        let file =
            std::env::var("CHAT_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("CHAT_").split("__"))
            .merge(
                Env::raw()
                    .only(&["DATABASE_URL", "REDIS_URL", "JWT_SECRET"])
                    .map(|key| {
                        let key = key.as_str();
                        if key.eq_ignore_ascii_case("DATABASE_URL") {
                            "database.url".into()
                        } else if key.eq_ignore_ascii_case("REDIS_URL") {
                            "redis.url".into()
                        } else {
                            "jwt.secret".into()
                        }
                    }),
            )
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::InvalidDatabaseConfig(
                "database url cannot be empty".to_string(),
            ));
        }
        if !self.database.is_memory() && self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "max connections must be greater than 0".to_string(),
            ));
        }

        if self.broker.backend == BrokerBackend::Redis && self.redis.url.is_empty() {
            return Err(ConfigError::InvalidBrokerConfig(
                "redis url cannot be empty when the redis backend is selected".to_string(),
            ));
        }
        if self.redis.consumer_group.is_empty() || self.redis.consumer_name.is_empty() {
            return Err(ConfigError::InvalidBrokerConfig(
                "consumer group and consumer name are required".to_string(),
            ));
        }

        // 至少 256 位
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration hours must be positive".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "port must be greater than 0".to_string(),
            ));
        }
        if self.server.outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "outbound queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.consumer.batch_size == 0 || self.consumer.flush_interval_secs == 0 {
            return Err(ConfigError::InvalidConsumerConfig(
                "batch size and flush interval must be greater than 0".to_string(),
            ));
        }
        if self.consumer.max_buffered < self.consumer.batch_size {
            return Err(ConfigError::InvalidConsumerConfig(
                "max_buffered must not be smaller than batch_size".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid broker configuration: {0}")]
    InvalidBrokerConfig(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid consumer configuration: {0}")]
    InvalidConsumerConfig(String),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        ConfigError::Load(Box::new(value))
    }
}
