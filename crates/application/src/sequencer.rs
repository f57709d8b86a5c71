//! 频道序列号分配
//!
//! 每个频道一把 `tokio::sync::Mutex`，保证“读取并递增”同一时刻只有一个调用者。
//! 外层 map 的锁只在查找/插入频道锁时持有，不同频道之间互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::ChannelName;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ApplicationError;

/// 提供频道已知的最大序列号，用于进程重启后续接编号。
#[async_trait]
pub trait SequenceSource: Send + Sync {
    async fn last_sequence(&self, channel: &ChannelName) -> Result<Option<u64>, ApplicationError>;
}

/// `seeded` 为 false 表示起点尚未从来源确认，下次分配会重新读取
#[derive(Debug, Clone, Copy)]
struct Slot {
    next: u64,
    seeded: bool,
}

type Counter = Arc<Mutex<Option<Slot>>>;

pub struct SequenceAllocator {
    counters: Mutex<HashMap<ChannelName, Counter>>,
    source: Option<Arc<dyn SequenceSource>>,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceAllocator {
    /// 每个频道从 0 开始编号
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            source: None,
        }
    }

    /// 首次为频道分配时，从 `source` 读取最大已知序列号并继续编号
    pub fn with_source(source: Arc<dyn SequenceSource>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            source: Some(source),
        }
    }

    /// 返回频道的下一个序列号并递增计数器
    pub async fn next(&self, channel: &ChannelName) -> u64 {
        let counter = self.counter(channel).await;
        let mut guard = counter.lock().await;
        let (sequence, seeded) = match *guard {
            Some(slot) if slot.seeded => (slot.next, true),
            slot => {
                let floor = slot.map_or(0, |slot| slot.next);
                match self.seed(channel).await {
                    Some(start) => (start.max(floor), true),
                    None => (floor, false),
                }
            }
        };
        *guard = Some(Slot {
            next: sequence + 1,
            seeded,
        });
        sequence
    }

    /// 下一个将要分配的序列号；频道尚未使用时返回 `None`
    pub async fn peek(&self, channel: &ChannelName) -> Option<u64> {
        let counter = self.counters.lock().await.get(channel).cloned()?;
        let slot = *counter.lock().await;
        slot.map(|slot| slot.next)
    }

    async fn counter(&self, channel: &ChannelName) -> Counter {
        let mut counters = self.counters.lock().await;
        counters
            .entry(channel.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// 读取失败时返回 `None`，调用方暂用本地计数，下次分配再读
    async fn seed(&self, channel: &ChannelName) -> Option<u64> {
        let Some(source) = &self.source else {
            return Some(0);
        };
        match source.last_sequence(channel).await {
            Ok(Some(last)) => {
                debug!(channel = %channel, last, "续接频道序列号");
                Some(last + 1)
            }
            Ok(None) => Some(0),
            Err(err) => {
                warn!(channel = %channel, error = %err, "读取频道最大序列号失败，暂用本地计数");
                None
            }
        }
    }
}
