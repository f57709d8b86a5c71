//! 主应用程序入口
//!
//! 读取配置，装配存储与队列后端，启动 Axum Web API 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{ChatRelay, ConsumerSettings, RelaySettings, SystemClock};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("加载配置失败")?;

    // RUST_LOG 优先，否则使用配置中的日志级别
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let infra = Infrastructure::connect(&config)
        .await
        .context("初始化存储与队列失败")?;

    let settings = RelaySettings {
        consumer: ConsumerSettings {
            batch_size: config.consumer.batch_size,
            flush_interval: config.consumer.flush_interval(),
            max_buffered: config.consumer.max_buffered,
        },
        outbound_capacity: config.server.outbound_queue_capacity,
    };
    let relay = Arc::new(ChatRelay::new(
        infra.stores,
        infra.broker,
        settings,
        Arc::new(SystemClock),
    ));
    relay.start().await.context("启动持久化消费失败")?;

    let jwt_service = Arc::new(JwtService::new(&config.jwt));
    let state = AppState::new(relay.clone(), jwt_service, infra.memory_directory);

    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("绑定地址 {address} 失败"))?;

    tracing::info!("聊天中继服务启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    relay.shutdown().await;
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听 Ctrl-C 失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到停止信号");
}
