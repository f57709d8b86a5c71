//! JWT 校验
//!
//! 令牌由外部认证服务签发，这里只负责验证签名和过期时间。

use axum::http::HeaderMap;
use config::JwtConfig;
use domain::{UserId, UserIdentity, UserRole, Username};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: UserRole,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl Claims {
    pub fn identity(&self) -> Result<UserIdentity, ApiError> {
        let username = Username::parse(self.username.as_str())
            .map_err(|err| ApiError::unauthorized(format!("invalid token subject: {err}")))?;
        Ok(UserIdentity::new(UserId::new(self.sub), username, self.role))
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_ref()),
            validation: Validation::default(),
        }
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }

    /// 优先读取 `Authorization: Bearer`，其次是 `?token=` 查询参数
    pub fn extract_claims(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<Claims, ApiError> {
        if let Some(auth_header) = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
        {
            let token = auth_header
                .strip_prefix("Bearer ")
                .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;
            return self.verify_token(token);
        }

        match query_token {
            Some(token) => self.verify_token(token),
            None => Err(ApiError::unauthorized("Missing authorization header")),
        }
    }
}
