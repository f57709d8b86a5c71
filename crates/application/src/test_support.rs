use std::sync::Arc;

use chrono::TimeZone;
use domain::{ChannelName, Timestamp, UserId, UserIdentity, UserRole, Username};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::memory::{MemoryDirectory, MemoryEventStore};
use crate::publisher::memory::MemoryBroker;
use crate::relay::{ChatRelay, RelaySettings, RelayStores};

pub struct Harness {
    pub relay: ChatRelay,
    pub directory: Arc<MemoryDirectory>,
    pub events: Arc<MemoryEventStore>,
    pub broker: Arc<MemoryBroker>,
}

impl Harness {
    /// 时钟固定在 12:34 UTC
    pub fn new() -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        let events = Arc::new(MemoryEventStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let fixed: Timestamp = chrono::Utc.with_ymd_and_hms(2024, 11, 24, 12, 34, 0).unwrap();
        let clock = Arc::new(move || fixed);
        let relay = ChatRelay::new(
            RelayStores::in_memory(directory.clone(), events.clone()),
            broker.clone(),
            RelaySettings::default(),
            clock,
        );
        Self {
            relay,
            directory,
            events,
            broker,
        }
    }

    pub async fn user(&self, name: &str, role: UserRole) -> UserIdentity {
        let identity = UserIdentity::new(
            UserId::new(Uuid::new_v4()),
            Username::parse(name).unwrap(),
            role,
        );
        self.directory.insert_user(identity.clone()).await;
        identity
    }
}

pub fn general() -> ChannelName {
    ChannelName::parse("general").unwrap()
}

pub fn name(value: &str) -> Username {
    Username::parse(value).unwrap()
}

/// 取出队列中已有的全部文本行
pub fn drain(outbound: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = outbound.try_recv() {
        lines.push(line);
    }
    lines
}
