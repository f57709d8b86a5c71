use std::collections::HashMap;
use std::sync::Arc;

use domain::ChannelName;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 按频道划分的互斥锁。锁在首次使用时创建，之后不再移除。
#[derive(Default)]
pub struct ChannelLocks {
    locks: Mutex<HashMap<ChannelName, Arc<Mutex<()>>>>,
}

impl ChannelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, channel: &ChannelName) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(channel.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
