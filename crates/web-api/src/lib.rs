//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 实时连接、频道历史查询与频道创建，
//! 将请求委托给应用层的 `ChatRelay`。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
