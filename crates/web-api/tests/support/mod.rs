use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{ChatRelay, RelaySettings, SystemClock};
use domain::UserRole;
use futures_util::StreamExt;
use infrastructure::Infrastructure;
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, Claims, JwtConfig, JwtService};

pub const SECRET: &str = "integration-test-secret-0123456789";

pub type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub relay: Arc<ChatRelay>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// 全内存后端的服务器，监听随机端口
    pub async fn spawn() -> Self {
        let infra = Infrastructure::in_memory();
        let relay = Arc::new(ChatRelay::new(
            infra.stores,
            infra.broker,
            RelaySettings::default(),
            Arc::new(SystemClock),
        ));
        relay.start().await.expect("start relay");

        let jwt_service = Arc::new(JwtService::new(&JwtConfig {
            secret: SECRET.to_string(),
            expiration_hours: 1,
        }));
        let state = AppState::new(relay.clone(), jwt_service, infra.memory_directory);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router(state).into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            relay,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self, channel: &str, token: &str) -> Client {
        let url = format!("ws://{}/api/v1/ws/{}?token={}", self.addr, channel, token);
        let (stream, _) = connect_async(url).await.expect("websocket handshake");
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct TestUser {
    pub name: String,
    pub token: String,
}

impl TestUser {
    pub fn new(name: &str, role: UserRole) -> Self {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: name.to_string(),
            role,
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("encode token");
        Self {
            name: name.to_string(),
            token,
        }
    }
}

/// 下一个文本帧；收到关闭帧或连接结束时返回 `None`
pub async fn next_line(client: &mut Client) -> Option<String> {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame");
        match frame {
            Some(Ok(TungsteniteMessage::Text(text))) => return Some(text.to_string()),
            Some(Ok(TungsteniteMessage::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}
