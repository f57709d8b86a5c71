//! Redis Streams 队列后端
//!
//! - 声明队列：`XGROUP CREATE <queue> <group> 0 MKSTREAM`，组已存在（BUSYGROUP）视为成功
//! - 发布：`XADD <queue> * payload <json>`
//! - 消费：先用 `0` 读取本消费者未确认的旧消息，读完后用 `>` 读取新消息
//! - 确认 / 拒绝：`XACK` + `XDEL`
//! - 放回队列：重新 `XADD`，再 `XACK` + `XDEL` 旧条目

use std::collections::{HashSet, VecDeque};

use application::{Acker, BrokerError, Delivery, DeliveryStream, EventBroker};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::StreamReadReply;
use redis::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone)]
pub struct RedisStreamSettings {
    pub url: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub block_ms: u64,
    /// 每次 XREADGROUP 最多读取的条目数
    pub read_count: usize,
}

impl RedisStreamSettings {
    pub fn from_config(config: &config::RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            consumer_group: config.consumer_group.clone(),
            consumer_name: config.consumer_name.clone(),
            block_ms: config.block_ms,
            read_count: 100,
        }
    }
}

fn connection_error(err: redis::RedisError) -> BrokerError {
    BrokerError::Connection(err.to_string())
}

pub struct RedisStreamBroker {
    client: Client,
    connection: ConnectionManager,
    settings: RedisStreamSettings,
    declared: Mutex<HashSet<String>>,
}

impl RedisStreamBroker {
    pub async fn connect(settings: RedisStreamSettings) -> Result<Self, BrokerError> {
        let client = Client::open(settings.url.as_str()).map_err(connection_error)?;
        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(connection_error)?;
        info!(
            group = %settings.consumer_group,
            consumer = %settings.consumer_name,
            "Redis Streams 队列已连接"
        );
        Ok(Self {
            client,
            connection,
            settings,
            declared: Mutex::new(HashSet::new()),
        })
    }
}

#[async_trait]
impl EventBroker for RedisStreamBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        if self.declared.lock().await.contains(queue) {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(&self.settings.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(queue, group = %self.settings.consumer_group, "消费者组已创建"),
            Err(err) if err.to_string().contains("BUSYGROUP") => {
                debug!(queue, group = %self.settings.consumer_group, "消费者组已存在");
            }
            Err(err) => return Err(BrokerError::Declare(err.to_string())),
        }

        self.declared.lock().await.insert(queue.to_string());
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|err| BrokerError::Publish(err.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, BrokerError> {
        // 阻塞读取独占一条连接，不影响发布和确认
        let reader = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_error)?;
        Ok(Box::new(RedisDeliveryStream {
            reader,
            acks: self.connection.clone(),
            queue: queue.to_string(),
            settings: self.settings.clone(),
            pending: VecDeque::new(),
            backlog: true,
        }))
    }
}

struct RedisDeliveryStream {
    reader: MultiplexedConnection,
    acks: ConnectionManager,
    queue: String,
    settings: RedisStreamSettings,
    pending: VecDeque<(String, Vec<u8>)>,
    /// 仍在读取本消费者未确认的旧消息
    backlog: bool,
}

impl RedisDeliveryStream {
    async fn read_batch(&mut self) -> Result<(), BrokerError> {
        let start = if self.backlog { "0" } else { ">" };
        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.settings.consumer_group)
            .arg(&self.settings.consumer_name)
            .arg("COUNT")
            .arg(self.settings.read_count)
            .arg("BLOCK")
            .arg(self.settings.block_ms)
            .arg("STREAMS")
            .arg(&self.queue)
            .arg(start)
            .query_async(&mut self.reader)
            .await
            .map_err(connection_error)?;

        let mut read = 0;
        for key in reply.keys {
            for entry in key.ids {
                // 已被删除的旧条目没有字段，得到空消息体后会被拒绝
                let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
                self.pending.push_back((entry.id, payload));
                read += 1;
            }
        }

        if self.backlog && read == 0 {
            debug!(queue = %self.queue, "未确认的旧消息已处理完");
            self.backlog = false;
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryStream for RedisDeliveryStream {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            if let Some((id, payload)) = self.pending.pop_front() {
                let acker = RedisAcker {
                    connection: self.acks.clone(),
                    queue: self.queue.clone(),
                    group: self.settings.consumer_group.clone(),
                    id,
                    payload: payload.clone(),
                };
                return Ok(Some(Delivery::new(payload, acker)));
            }
            self.read_batch().await?;
        }
    }
}

struct RedisAcker {
    connection: ConnectionManager,
    queue: String,
    group: String,
    id: String,
    payload: Vec<u8>,
}

impl RedisAcker {
    fn settle(&self, pipe: &mut redis::Pipeline) {
        pipe.cmd("XACK")
            .arg(&self.queue)
            .arg(&self.group)
            .arg(&self.id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.queue)
            .arg(&self.id)
            .ignore();
    }
}

#[async_trait]
impl Acker for RedisAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.settle(&mut pipe);
        let mut conn = self.connection.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|err| BrokerError::Acknowledge(err.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        if requeue {
            pipe.cmd("XADD")
                .arg(&self.queue)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(&self.payload)
                .ignore();
        } else {
            warn!(queue = %self.queue, id = %self.id, "消息被拒绝并删除");
        }
        self.settle(&mut pipe);
        let mut conn = self.connection.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|err| BrokerError::Acknowledge(err.to_string()))
    }
}
