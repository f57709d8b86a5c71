use crate::value_objects::{UserId, Username};

/// 用户角色。只有 `Moderator` 可以创建频道和执行管理命令。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Moderator,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Moderator => "moderator",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "moderator" => UserRole::Moderator,
            _ => UserRole::User,
        }
    }
}

/// 已经通过认证的用户身份。
///
/// 用户的增删改不在本服务范围内，这里只保存连接与管理命令需要的字段。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub username: Username,
    pub role: UserRole,
}

impl UserIdentity {
    pub fn new(id: UserId, username: Username, role: UserRole) -> Self {
        Self { id, username, role }
    }

    pub fn is_moderator(&self) -> bool {
        self.role == UserRole::Moderator
    }
}
