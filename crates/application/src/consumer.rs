//! 持久化队列消费与批量写库
//!
//! 每个频道队列一个消费任务，所有任务共享同一个 `MessageBuffer`；另有一个定时刷新任务。
//! 消息在进入缓冲之后才确认，因此进程崩溃时未确认的消息会被重新投递。
//! 队列读取持续失败时，消费任务重新订阅，直到收到停止信号为止。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use domain::{ChannelName, ChatEvent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::MessageBuffer;
use crate::error::ApplicationError;
use crate::publisher::{BrokerError, Delivery, DeliveryStream, EventBroker};
use crate::repository::{ChannelRepository, ChatEventStore};

/// 同一订阅连续读取失败这么多次后放弃该订阅并重新订阅
const MAX_RETRIES: u32 = 5;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
/// 消息放回队列后等待一段时间再读取，避免存储故障期间空转
const REQUEUE_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// 缓冲达到该数量时立即写库
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// 存储持续失败时缓冲的上限，超过后消息回到队列
    pub max_buffered: usize,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(30),
            max_buffered: 10_000,
        }
    }
}

/// 单条投递的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Buffered,
    Requeued,
    Rejected,
}

pub struct BatchingConsumer {
    buffer: Arc<MessageBuffer>,
    store: Arc<dyn ChatEventStore>,
    settings: ConsumerSettings,
    /// 上次写库失败且尚未成功刷新过；期间只由定时器重试
    storage_failing: AtomicBool,
}

impl BatchingConsumer {
    pub fn new(
        buffer: Arc<MessageBuffer>,
        store: Arc<dyn ChatEventStore>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            buffer,
            store,
            settings,
            storage_failing: AtomicBool::new(false),
        }
    }

    pub fn buffer(&self) -> Arc<MessageBuffer> {
        self.buffer.clone()
    }

    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        let event = match ChatEvent::from_payload(&delivery.payload) {
            Ok(event) => event,
            Err(err) => {
                let err = ApplicationError::MalformedEvent(err.to_string());
                warn!(error = %err, "丢弃无法解析的事件");
                if let Err(ack_err) = delivery.reject().await {
                    warn!(error = %ack_err, "拒绝消息失败");
                }
                return DeliveryOutcome::Rejected;
            }
        };

        if self.buffer.len().await >= self.settings.max_buffered {
            warn!(
                channel = %event.channel,
                sequence = event.sequence_number,
                max_buffered = self.settings.max_buffered,
                "缓冲已满，消息放回队列"
            );
            if let Err(err) = delivery.requeue().await {
                warn!(error = %err, "消息放回队列失败");
            }
            return DeliveryOutcome::Requeued;
        }

        debug!(
            channel = %event.channel,
            sequence = event.sequence_number,
            action = event.action(),
            "事件进入缓冲"
        );
        let buffered = self.buffer.push(event).await;
        if let Err(err) = delivery.ack().await {
            warn!(error = %err, "确认消息失败");
        }

        if buffered >= self.settings.batch_size && !self.storage_failing.load(Ordering::SeqCst) {
            // 失败已在 flush 内记录，事件留在缓冲等待定时器
            let _ = self.flush().await;
        }
        DeliveryOutcome::Buffered
    }

    pub async fn flush(&self) -> Result<usize, ApplicationError> {
        let result = self.buffer.flush_to(self.store.as_ref()).await;
        self.storage_failing.store(result.is_err(), Ordering::SeqCst);
        result
    }

    /// 消费一个队列直到关闭或取消；同一订阅连续失败 `MAX_RETRIES` 次时返回错误
    pub async fn consume(
        &self,
        queue: &str,
        mut stream: Box<dyn DeliveryStream>,
        shutdown: CancellationToken,
    ) -> Result<(), ApplicationError> {
        let mut retry_count = 0;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(queue, "消费任务收到停止信号");
                    return Ok(());
                }
                next = stream.next_delivery() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    retry_count = 0;
                    if self.handle_delivery(delivery).await == DeliveryOutcome::Requeued {
                        if wait_or_cancelled(REQUEUE_BACKOFF, &shutdown).await {
                            return Ok(());
                        }
                    }
                }
                Ok(None) => {
                    info!(queue, "队列已关闭，消费任务结束");
                    return Ok(());
                }
                Err(err) => {
                    retry_count += 1;
                    error!(queue, error = %err, retry_count, "读取队列失败");
                    if retry_count >= MAX_RETRIES {
                        return Err(ApplicationError::BrokerUnavailable(err));
                    }
                    if wait_or_cancelled(retry_delay(retry_count), &shutdown).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// 定时刷新，取消时做最后一次刷新
    pub async fn run_flush_timer(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即返回
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.flush().await;
                }
            }
        }

        match self.flush().await {
            Ok(count) => info!(count, "停止前的最后一次刷新完成"),
            Err(err) => error!(error = %err, "停止前的最后一次刷新失败"),
        }
    }
}

/// 第 `attempt` 次重试前的等待时间，1 秒起步逐次翻倍
fn retry_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(5);
    (Duration::from_secs(1) * 2_u32.pow(exponent)).min(MAX_RETRY_DELAY)
}

/// 等待 `delay`；期间收到停止信号返回 true
async fn wait_or_cancelled(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(delay) => false,
    }
}

async fn subscribe(
    broker: &dyn EventBroker,
    queue: &str,
) -> Result<Box<dyn DeliveryStream>, BrokerError> {
    broker.declare_queue(queue).await?;
    broker.subscribe(queue).await
}

/// 管理所有频道的消费任务和刷新定时器
pub struct DurableConsumer {
    consumer: Arc<BatchingConsumer>,
    broker: Arc<dyn EventBroker>,
    active: Arc<Mutex<HashSet<ChannelName>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl DurableConsumer {
    pub fn new(consumer: Arc<BatchingConsumer>, broker: Arc<dyn EventBroker>) -> Self {
        Self {
            consumer,
            broker,
            active: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// 启动刷新定时器，并为已有频道启动消费任务
    pub async fn start(&self, channels: &dyn ChannelRepository) -> Result<(), ApplicationError> {
        let consumer = self.consumer.clone();
        let shutdown = self.shutdown.clone();
        let timer = tokio::spawn(async move { consumer.run_flush_timer(shutdown).await });
        self.tasks.lock().await.push(timer);

        let names = channels.list_names().await?;
        info!(channels = names.len(), "启动频道消费任务");
        for name in names {
            if let Err(err) = self.ensure_channel(&name).await {
                warn!(channel = %name, error = %err, "启动频道消费任务失败");
            }
        }
        Ok(())
    }

    /// 确保频道有一个消费任务（幂等）
    pub async fn ensure_channel(&self, channel: &ChannelName) -> Result<(), ApplicationError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        {
            let mut active = self.active.lock().await;
            if !active.insert(channel.clone()) {
                return Ok(());
            }
        }

        let queue = channel.queue_name();
        let stream = match subscribe(self.broker.as_ref(), &queue).await {
            Ok(stream) => stream,
            Err(err) => {
                self.active.lock().await.remove(channel);
                return Err(ApplicationError::BrokerUnavailable(err));
            }
        };

        let consumer = self.consumer.clone();
        let broker = self.broker.clone();
        let shutdown = self.shutdown.clone();
        let active = self.active.clone();
        let channel = channel.clone();
        let handle = tokio::spawn(async move {
            info!(queue = %queue, "频道消费任务已启动");
            let mut stream = Some(stream);
            let mut attempt = 0;
            loop {
                let current = match stream.take() {
                    Some(current) => current,
                    None => match subscribe(broker.as_ref(), &queue).await {
                        Ok(current) => {
                            info!(queue = %queue, attempt, "已重新订阅队列");
                            current
                        }
                        Err(err) => {
                            attempt += 1;
                            warn!(queue = %queue, error = %err, attempt, "重新订阅队列失败");
                            if wait_or_cancelled(retry_delay(attempt), &shutdown).await {
                                break;
                            }
                            continue;
                        }
                    },
                };
                attempt = 0;

                match consumer.consume(&queue, current, shutdown.clone()).await {
                    Ok(()) => break,
                    Err(err) => {
                        error!(queue = %queue, error = %err, "队列读取持续失败，准备重新订阅");
                        if wait_or_cancelled(retry_delay(1), &shutdown).await {
                            break;
                        }
                    }
                }
            }
            active.lock().await.remove(&channel);
        });
        self.tasks.lock().await.push(handle);
        Ok(())
    }

    pub async fn is_consuming(&self, channel: &ChannelName) -> bool {
        self.active.lock().await.contains(channel)
    }

    pub async fn flush(&self) -> Result<usize, ApplicationError> {
        self.consumer.flush().await
    }

    /// 停止全部任务，刷新定时器会在退出前完成最后一次刷新
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "等待消费任务结束失败");
            }
        }
        // 定时器未启动时也要写完缓冲
        if let Err(err) = self.consumer.flush().await {
            error!(error = %err, "关闭时刷新缓冲失败");
        }
        info!("持久化消费已停止");
    }
}
