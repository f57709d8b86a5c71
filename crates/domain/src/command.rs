//! 客户端输入行解析
//!
//! 以 `/invite`、`/block`、`/unblock`、`/kick` 开头的行是管理命令，其余都是聊天内容。

use crate::errors::DomainError;
use crate::value_objects::Username;

/// 管理命令种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Invite,
    Block,
    Unblock,
    Kick,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Invite => "invite",
            ModerationAction::Block => "block",
            ModerationAction::Unblock => "unblock",
            ModerationAction::Kick => "kick",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "/invite" => Some(ModerationAction::Invite),
            "/block" => Some(ModerationAction::Block),
            "/unblock" => Some(ModerationAction::Unblock),
            "/kick" => Some(ModerationAction::Kick),
            _ => None,
        }
    }
}

/// 一行输入的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    /// 空行，直接忽略
    Empty,
    /// 普通聊天内容
    Chat(String),
    /// 管理命令
    Command {
        action: ModerationAction,
        target: Username,
    },
}

impl InboundLine {
    pub fn parse(line: &str) -> Result<Self, DomainError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(InboundLine::Empty);
        }

        let mut parts = trimmed.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let Some(action) = ModerationAction::from_token(head) else {
            return Ok(InboundLine::Chat(trimmed.to_string()));
        };

        let target = parts
            .next()
            .ok_or_else(|| DomainError::invalid_argument("username", "missing command target"))?;
        if parts.next().is_some() {
            return Err(DomainError::invalid_argument(
                "username",
                "commands take exactly one username",
            ));
        }

        Ok(InboundLine::Command {
            action,
            target: Username::parse(target)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(
            InboundLine::parse("hello there").unwrap(),
            InboundLine::Chat("hello there".to_string())
        );
        assert_eq!(InboundLine::parse("   ").unwrap(), InboundLine::Empty);
    }

    #[test]
    fn recognizes_moderation_commands() {
        let parsed = InboundLine::parse("/block bob").unwrap();
        assert_eq!(
            parsed,
            InboundLine::Command {
                action: ModerationAction::Block,
                target: Username::parse("bob").unwrap(),
            }
        );

        assert!(matches!(
            InboundLine::parse("/kick   carol ").unwrap(),
            InboundLine::Command {
                action: ModerationAction::Kick,
                ..
            }
        ));
    }

    #[test]
    fn unknown_slash_prefix_is_chat() {
        assert_eq!(
            InboundLine::parse("/shrug").unwrap(),
            InboundLine::Chat("/shrug".to_string())
        );
    }

    #[test]
    fn command_without_target_is_rejected() {
        assert!(InboundLine::parse("/invite").is_err());
        assert!(InboundLine::parse("/invite a b").is_err());
    }
}
