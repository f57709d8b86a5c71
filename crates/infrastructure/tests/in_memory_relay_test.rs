use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::{
    ChatEventStore, ChatRelay, ConsumerSettings, MemoryDirectory, MemoryEventStore,
    RelaySettings, RelayStores, SystemClock,
};
use async_trait::async_trait;
use domain::{ChannelName, ChatEvent, RepositoryError, UserId, UserIdentity, UserRole, Username};
use infrastructure::Infrastructure;
use uuid::Uuid;

/// 统计批量写入次数的事件存储
struct CountingStore {
    inner: MemoryEventStore,
    flushes: AtomicUsize,
}

#[async_trait]
impl ChatEventStore for CountingStore {
    async fn append_events(&self, events: &[ChatEvent]) -> Result<u64, RepositoryError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.inner.append_events(events).await
    }

    async fn events_ordered(
        &self,
        channel: &ChannelName,
    ) -> Result<Vec<ChatEvent>, RepositoryError> {
        self.inner.events_ordered(channel).await
    }

    async fn max_sequence(&self, channel: &ChannelName) -> Result<Option<u64>, RepositoryError> {
        self.inner.max_sequence(channel).await
    }
}

fn moderator(name: &str) -> UserIdentity {
    UserIdentity::new(
        UserId::from(Uuid::new_v4()),
        Username::parse(name).unwrap(),
        UserRole::Moderator,
    )
}

async fn wait_for_buffer(relay: &ChatRelay, expected: usize) {
    for _ in 0..200 {
        if relay.buffer.len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("buffer never reached {expected} events");
}

#[tokio::test]
async fn in_memory_backend_runs_full_relay() {
    let infra = Infrastructure::in_memory();
    let directory = infra.memory_directory.clone().unwrap();
    let relay = ChatRelay::new(
        infra.stores,
        infra.broker,
        RelaySettings::default(),
        Arc::new(SystemClock),
    );
    relay.start().await.unwrap();

    let admin = moderator("admin");
    directory.insert_user(admin.clone()).await;
    let channel = ChannelName::parse("lobby").unwrap();

    let mut opened = relay.sessions.connect(admin, &channel).await.unwrap();
    relay
        .sessions
        .handle_line(&opened.session, "hello")
        .await
        .unwrap();

    let first = opened.outbound.recv().await.unwrap();
    assert!(first.ends_with("admin joined the channel"), "{first}");

    wait_for_buffer(&relay, 2).await;
    let history = relay.history.history(&channel).await.unwrap();
    let actions: Vec<&str> = history.iter().map(|event| event.action()).collect();
    assert_eq!(actions, vec!["connect", "message"]);

    relay.sessions.disconnect(&opened.session).await;
    relay.shutdown().await;
}

#[tokio::test]
async fn batch_threshold_flushes_twice_for_150_events() {
    let directory = Arc::new(MemoryDirectory::new());
    let store = Arc::new(CountingStore {
        inner: MemoryEventStore::new(),
        flushes: AtomicUsize::new(0),
    });
    let mut stores = RelayStores::in_memory(directory.clone(), Arc::new(MemoryEventStore::new()));
    stores.events = store.clone();

    let infra = Infrastructure::in_memory();
    let relay = ChatRelay::new(
        stores,
        infra.broker,
        RelaySettings {
            consumer: ConsumerSettings {
                batch_size: 100,
                flush_interval: Duration::from_secs(3600),
                max_buffered: 10_000,
            },
            ..RelaySettings::default()
        },
        Arc::new(SystemClock),
    );
    relay.start().await.unwrap();

    let admin = moderator("admin");
    directory.insert_user(admin.clone()).await;
    let channel = ChannelName::parse("busy").unwrap();

    // 连接事件加 149 条消息共 150 个事件
    let opened = relay.sessions.connect(admin, &channel).await.unwrap();
    for index in 0..149 {
        relay
            .sessions
            .handle_line(&opened.session, &format!("message {index}"))
            .await
            .unwrap();
    }

    // 第 100 个事件触发一次写库，剩余 50 个留在缓冲
    for _ in 0..200 {
        if store.flushes.load(Ordering::SeqCst) == 1 && relay.buffer.len().await == 50 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.flushes.load(Ordering::SeqCst), 1);
    assert_eq!(relay.buffer.len().await, 50);

    drop(opened);
    relay.shutdown().await;

    assert_eq!(store.flushes.load(Ordering::SeqCst), 2);
    let stored = store.inner.events_ordered(&channel).await.unwrap();
    assert_eq!(stored.len(), 150);
    let sequences: Vec<u64> = stored.iter().map(|event| event.sequence_number).collect();
    assert_eq!(sequences, (0..150).collect::<Vec<u64>>());
}
