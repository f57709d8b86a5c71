//! 持久化发布
//!
//! 每条事件在实时广播之后被发布到频道对应的持久化队列 `<channel>_messages`。
//! 队列后端通过 `EventBroker` 抽象：生产环境用 Redis Streams，测试和单机开发用内存队列。

use std::sync::Arc;

use async_trait::async_trait;
use domain::ChatEvent;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ApplicationError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("queue declare failed: {0}")]
    Declare(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("acknowledge failed: {0}")]
    Acknowledge(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 消息确认
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    /// `requeue = false` 表示拒绝并丢弃
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// 从队列收到的一条消息
pub struct Delivery {
    pub payload: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acker: impl Acker + 'static) -> Self {
        Self {
            payload,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// 暂时无法处理，放回队列等待重新投递
    pub async fn requeue(self) -> Result<(), BrokerError> {
        self.acker.nack(true).await
    }

    /// 永久无法处理，丢弃
    pub async fn reject(self) -> Result<(), BrokerError> {
        self.acker.nack(false).await
    }
}

#[async_trait]
pub trait DeliveryStream: Send {
    /// 等待下一条消息；队列关闭时返回 `None`
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError>;
}

#[async_trait]
pub trait EventBroker: Send + Sync {
    /// 幂等地声明持久化队列
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, BrokerError>;
}

/// 持久化发布器
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn EventBroker>,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn EventBroker>) -> Self {
        Self { broker }
    }

    pub async fn publish(&self, event: &ChatEvent) -> Result<(), ApplicationError> {
        let queue = event.channel.queue_name();
        let result = self.try_publish(&queue, event).await;
        match &result {
            Ok(()) => debug!(
                queue = %queue,
                sequence = event.sequence_number,
                action = event.action(),
                "事件已发布"
            ),
            Err(err) => warn!(
                queue = %queue,
                sequence = event.sequence_number,
                error = %err,
                "事件发布失败"
            ),
        }
        result.map_err(ApplicationError::from)
    }

    async fn try_publish(&self, queue: &str, event: &ChatEvent) -> Result<(), BrokerError> {
        self.broker.declare_queue(queue).await?;
        let payload = event.to_payload()?;
        self.broker.publish(queue, payload).await
    }
}

pub mod memory {
    //! 内存队列：每个队列一个无界通道，只允许一个消费者。

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Mutex};

    struct Queue {
        sender: mpsc::UnboundedSender<Vec<u8>>,
        receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    }

    impl Queue {
        fn new() -> Self {
            let (sender, receiver) = mpsc::unbounded_channel();
            Self {
                sender,
                receiver: Some(receiver),
            }
        }
    }

    /// 确认结果计数，供测试观察
    #[derive(Debug, Default)]
    pub struct BrokerStats {
        pub published: AtomicUsize,
        pub acked: AtomicUsize,
        pub requeued: AtomicUsize,
        pub rejected: AtomicUsize,
    }

    impl BrokerStats {
        pub fn published(&self) -> usize {
            self.published.load(Ordering::SeqCst)
        }

        pub fn acked(&self) -> usize {
            self.acked.load(Ordering::SeqCst)
        }

        pub fn requeued(&self) -> usize {
            self.requeued.load(Ordering::SeqCst)
        }

        pub fn rejected(&self) -> usize {
            self.rejected.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    pub struct MemoryBroker {
        queues: Mutex<HashMap<String, Queue>>,
        stats: Arc<BrokerStats>,
    }

    impl MemoryBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn stats(&self) -> Arc<BrokerStats> {
            self.stats.clone()
        }

        pub async fn has_queue(&self, queue: &str) -> bool {
            self.queues.lock().await.contains_key(queue)
        }
    }

    #[async_trait]
    impl EventBroker for MemoryBroker {
        async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
            self.queues
                .lock()
                .await
                .entry(queue.to_string())
                .or_insert_with(Queue::new);
            Ok(())
        }

        async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
            let queues = self.queues.lock().await;
            let target = queues
                .get(queue)
                .ok_or_else(|| BrokerError::Publish(format!("queue {queue} not declared")))?;
            target
                .sender
                .send(payload)
                .map_err(|err| BrokerError::Publish(err.to_string()))?;
            self.stats.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, BrokerError> {
            let mut queues = self.queues.lock().await;
            let target = queues.entry(queue.to_string()).or_insert_with(Queue::new);
            let receiver = target.receiver.take().ok_or_else(|| {
                BrokerError::Subscribe(format!("queue {queue} already has a consumer"))
            })?;
            Ok(Box::new(MemoryDeliveryStream {
                receiver,
                requeue: target.sender.clone(),
                stats: self.stats.clone(),
            }))
        }
    }

    struct MemoryDeliveryStream {
        receiver: mpsc::UnboundedReceiver<Vec<u8>>,
        requeue: mpsc::UnboundedSender<Vec<u8>>,
        stats: Arc<BrokerStats>,
    }

    #[async_trait]
    impl DeliveryStream for MemoryDeliveryStream {
        async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
            let Some(payload) = self.receiver.recv().await else {
                return Ok(None);
            };
            let acker = MemoryAcker {
                payload: payload.clone(),
                requeue: self.requeue.clone(),
                stats: self.stats.clone(),
            };
            Ok(Some(Delivery::new(payload, acker)))
        }
    }

    struct MemoryAcker {
        payload: Vec<u8>,
        requeue: mpsc::UnboundedSender<Vec<u8>>,
        stats: Arc<BrokerStats>,
    }

    #[async_trait]
    impl Acker for MemoryAcker {
        async fn ack(&self) -> Result<(), BrokerError> {
            self.stats.acked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
            if requeue {
                self.requeue
                    .send(self.payload.clone())
                    .map_err(|err| BrokerError::Acknowledge(err.to_string()))?;
                self.stats.requeued.fetch_add(1, Ordering::SeqCst);
            } else {
                self.stats.rejected.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }
}
