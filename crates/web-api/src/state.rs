use std::sync::Arc;

use application::{ChatRelay, MemoryDirectory};
use domain::{UserId, UserIdentity};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<ChatRelay>,
    pub jwt_service: Arc<JwtService>,
    /// 内存模式下按令牌声明登记用户
    pub provisioning: Option<Arc<MemoryDirectory>>,
}

impl AppState {
    pub fn new(
        relay: Arc<ChatRelay>,
        jwt_service: Arc<JwtService>,
        provisioning: Option<Arc<MemoryDirectory>>,
    ) -> Self {
        Self {
            relay,
            jwt_service,
            provisioning,
        }
    }

    /// 把令牌声明解析为用户身份
    pub async fn resolve_identity(&self, claims: &Claims) -> Result<UserIdentity, ApiError> {
        if let Some(directory) = &self.provisioning {
            let identity = claims.identity()?;
            directory.insert_user(identity.clone()).await;
            return Ok(identity);
        }

        self.relay
            .users
            .find_by_id(UserId::new(claims.sub))
            .await
            .map_err(application::ApplicationError::from)?
            .ok_or_else(|| ApiError::unauthorized("unknown user"))
    }
}
