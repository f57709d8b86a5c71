use application::EventBroker;
use infrastructure::{RedisStreamBroker, RedisStreamSettings};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::{Redis, REDIS_PORT};

fn settings(url: &str, consumer: &str) -> RedisStreamSettings {
    RedisStreamSettings {
        url: url.to_string(),
        consumer_group: "chat_relay".to_string(),
        consumer_name: consumer.to_string(),
        block_ms: 200,
        read_count: 10,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires local docker daemon"]
async fn redis_streams_deliver_requeue_and_recover() {
    let node = Redis::default().start().await.expect("start redis");
    let port = node.get_host_port_ipv4(REDIS_PORT).await.expect("port");
    let url = format!("redis://127.0.0.1:{port}");

    let broker = RedisStreamBroker::connect(settings(&url, "relay-1"))
        .await
        .expect("connect");
    broker.declare_queue("general_messages").await.expect("declare");
    broker.declare_queue("general_messages").await.expect("declare twice");

    broker
        .publish("general_messages", b"first".to_vec())
        .await
        .expect("publish");
    broker
        .publish("general_messages", b"second".to_vec())
        .await
        .expect("publish");

    let mut stream = broker.subscribe("general_messages").await.expect("subscribe");
    let first = stream.next_delivery().await.expect("read").expect("delivery");
    assert_eq!(first.payload, b"first");
    first.requeue().await.expect("requeue");

    let second = stream.next_delivery().await.expect("read").expect("delivery");
    assert_eq!(second.payload, b"second");
    second.ack().await.expect("ack");

    // 放回队列的消息排在后面重新投递，且不确认
    let again = stream.next_delivery().await.expect("read").expect("delivery");
    assert_eq!(again.payload, b"first");
    drop(again);
    drop(stream);

    // 同名消费者重新订阅时先收到未确认的旧消息
    let mut recovered = broker.subscribe("general_messages").await.expect("subscribe");
    let pending = recovered.next_delivery().await.expect("read").expect("delivery");
    assert_eq!(pending.payload, b"first");
    pending.reject().await.expect("reject");
}
