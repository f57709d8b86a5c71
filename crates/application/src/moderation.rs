//! 频道管理命令
//!
//! 每个 (频道, 用户) 的状态只有三种：非成员、成员、被封禁。
//! 同一频道的所有命令在频道锁下执行，状态变化与事件序列号的先后一致。

use std::sync::Arc;

use domain::{
    Block, ChannelName, ChatEvent, ChatEventKind, Membership, ModerationAction, UserIdentity,
    Username,
};
use tracing::info;

use crate::broadcaster::render_kick;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::pipeline::EventPipeline;
use crate::registry::ChannelRegistry;
use crate::repository::{BlockRepository, MembershipRepository, UserDirectory};

pub struct ModerationDependencies {
    pub users: Arc<dyn UserDirectory>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub blocks: Arc<dyn BlockRepository>,
    pub registry: Arc<ChannelRegistry>,
    pub pipeline: Arc<EventPipeline>,
    pub clock: Arc<dyn Clock>,
}

pub struct ModerationService {
    deps: ModerationDependencies,
}

impl ModerationService {
    pub fn new(deps: ModerationDependencies) -> Self {
        Self { deps }
    }

    pub async fn execute(
        &self,
        actor: &UserIdentity,
        channel: &ChannelName,
        action: ModerationAction,
        target: &Username,
    ) -> Result<ChatEvent, ApplicationError> {
        match action {
            ModerationAction::Invite => self.invite(actor, channel, target).await,
            ModerationAction::Block => self.block(actor, channel, target).await,
            ModerationAction::Unblock => self.unblock(actor, channel, target).await,
            ModerationAction::Kick => self.kick(actor, channel, target).await,
        }
    }

    pub async fn invite(
        &self,
        actor: &UserIdentity,
        channel: &ChannelName,
        target: &Username,
    ) -> Result<ChatEvent, ApplicationError> {
        ensure_moderator(actor)?;
        let _guard = self.deps.registry.lock_channel(channel).await;

        let user = self.resolve(target).await?;
        if self.deps.memberships.find(channel, user.id).await?.is_some() {
            return Err(ApplicationError::AlreadyMember(target.to_string()));
        }
        if self.deps.blocks.find(channel, user.id).await?.is_some() {
            return Err(ApplicationError::Blocked {
                channel: channel.to_string(),
            });
        }

        self.deps
            .memberships
            .upsert(Membership::new(channel.clone(), user.id, self.deps.clock.now()))
            .await?;
        info!(channel = %channel, moderator = %actor.username, target = %target, "用户已被邀请");

        let kind = ChatEventKind::Invited {
            username: target.clone(),
        };
        Ok(self.deps.pipeline.emit(channel, kind).await)
    }

    pub async fn block(
        &self,
        actor: &UserIdentity,
        channel: &ChannelName,
        target: &Username,
    ) -> Result<ChatEvent, ApplicationError> {
        ensure_moderator(actor)?;
        ensure_not_self(actor, target, ModerationAction::Block)?;
        let _guard = self.deps.registry.lock_channel(channel).await;

        let user = self.resolve(target).await?;
        if self.deps.memberships.find(channel, user.id).await?.is_none() {
            return Err(ApplicationError::NotMember(target.to_string()));
        }

        self.deps
            .registry
            .disconnect_user(
                channel,
                target,
                &format!("You have been blocked from channel {channel}"),
            )
            .await;
        self.deps
            .blocks
            .block(Block::new(
                channel.clone(),
                target.clone(),
                user.id,
                self.deps.clock.now(),
            ))
            .await?;
        info!(channel = %channel, moderator = %actor.username, target = %target, "用户已被封禁");

        let kind = ChatEventKind::Blocked {
            username: target.clone(),
        };
        Ok(self.deps.pipeline.emit(channel, kind).await)
    }

    pub async fn unblock(
        &self,
        actor: &UserIdentity,
        channel: &ChannelName,
        target: &Username,
    ) -> Result<ChatEvent, ApplicationError> {
        ensure_moderator(actor)?;
        ensure_not_self(actor, target, ModerationAction::Unblock)?;
        let _guard = self.deps.registry.lock_channel(channel).await;

        let user = self.resolve(target).await?;
        let restored = Membership::new(channel.clone(), user.id, self.deps.clock.now());
        if self
            .deps
            .blocks
            .unblock(channel, user.id, restored)
            .await?
            .is_none()
        {
            return Err(ApplicationError::NotBlocked(target.to_string()));
        }
        info!(channel = %channel, moderator = %actor.username, target = %target, "用户已解封");

        let kind = ChatEventKind::Unblocked {
            username: target.clone(),
        };
        Ok(self.deps.pipeline.emit(channel, kind).await)
    }

    pub async fn kick(
        &self,
        actor: &UserIdentity,
        channel: &ChannelName,
        target: &Username,
    ) -> Result<ChatEvent, ApplicationError> {
        ensure_moderator(actor)?;
        ensure_not_self(actor, target, ModerationAction::Kick)?;
        let _guard = self.deps.registry.lock_channel(channel).await;

        let kicked = self
            .deps
            .registry
            .disconnect_user(
                channel,
                target,
                &format!("You have been kicked from channel {channel}"),
            )
            .await;
        if !kicked {
            return Err(ApplicationError::NotConnected(target.to_string()));
        }
        info!(channel = %channel, moderator = %actor.username, target = %target, "用户已被踢出");

        let kind = ChatEventKind::Disconnect {
            username: target.clone(),
        };
        Ok(self
            .deps
            .pipeline
            .emit_rendered(channel, kind, render_kick)
            .await)
    }

    async fn resolve(&self, target: &Username) -> Result<UserIdentity, ApplicationError> {
        self.deps
            .users
            .find_by_username(target)
            .await?
            .ok_or_else(|| ApplicationError::UnknownUser(target.to_string()))
    }
}

fn ensure_moderator(actor: &UserIdentity) -> Result<(), ApplicationError> {
    if actor.is_moderator() {
        Ok(())
    } else {
        Err(ApplicationError::Forbidden)
    }
}

fn ensure_not_self(
    actor: &UserIdentity,
    target: &Username,
    action: ModerationAction,
) -> Result<(), ApplicationError> {
    if &actor.username == target {
        Err(ApplicationError::InvalidTarget(action.as_str()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain, general, name, Harness};
    use domain::UserRole;

    async fn setup() -> (Harness, UserIdentity, UserIdentity) {
        let harness = Harness::new();
        let moderator = harness.user("mod", UserRole::Moderator).await;
        let user = harness.user("bob", UserRole::User).await;
        harness
            .relay
            .registry
            .create_channel(&general(), &moderator)
            .await
            .unwrap();
        (harness, moderator, user)
    }

    async fn is_member(harness: &Harness, user: &UserIdentity) -> bool {
        MembershipRepository::find(&*harness.directory, &general(), user.id)
            .await
            .unwrap()
            .is_some()
    }

    async fn is_blocked(harness: &Harness, user: &UserIdentity) -> bool {
        BlockRepository::find(&*harness.directory, &general(), user.id)
            .await
            .unwrap()
            .is_some()
    }

    #[tokio::test]
    async fn only_moderators_may_moderate() {
        let (harness, _moderator, user) = setup().await;
        let moderation = &harness.relay.moderation;

        let result = moderation.invite(&user, &general(), &name("mod")).await;
        assert!(matches!(result, Err(ApplicationError::Forbidden)));
        let result = moderation.kick(&user, &general(), &name("mod")).await;
        assert!(matches!(result, Err(ApplicationError::Forbidden)));
    }

    #[tokio::test]
    async fn invite_validates_target() {
        let (harness, moderator, user) = setup().await;
        let moderation = &harness.relay.moderation;

        let unknown = moderation.invite(&moderator, &general(), &name("ghost")).await;
        assert!(matches!(unknown, Err(ApplicationError::UnknownUser(_))));

        let event = moderation
            .invite(&moderator, &general(), &user.username)
            .await
            .unwrap();
        assert_eq!(event.action(), "invite");
        assert!(is_member(&harness, &user).await);

        let again = moderation.invite(&moderator, &general(), &user.username).await;
        assert!(matches!(again, Err(ApplicationError::AlreadyMember(_))));
    }

    #[tokio::test]
    async fn block_then_unblock_restores_membership() {
        let (harness, moderator, user) = setup().await;
        let moderation = &harness.relay.moderation;

        let not_member = moderation.block(&moderator, &general(), &user.username).await;
        assert!(matches!(not_member, Err(ApplicationError::NotMember(_))));

        moderation
            .invite(&moderator, &general(), &user.username)
            .await
            .unwrap();
        moderation
            .block(&moderator, &general(), &user.username)
            .await
            .unwrap();
        assert!(!is_member(&harness, &user).await);
        assert!(is_blocked(&harness, &user).await);

        let invite_blocked = moderation.invite(&moderator, &general(), &user.username).await;
        assert!(matches!(invite_blocked, Err(ApplicationError::Blocked { .. })));

        let event = moderation
            .unblock(&moderator, &general(), &user.username)
            .await
            .unwrap();
        assert_eq!(event.action(), "unblock");
        assert!(is_member(&harness, &user).await);
        assert!(!is_blocked(&harness, &user).await);

        let again = moderation.unblock(&moderator, &general(), &user.username).await;
        assert!(matches!(again, Err(ApplicationError::NotBlocked(_))));
        assert!(is_member(&harness, &user).await);
    }

    #[tokio::test]
    async fn moderators_cannot_target_themselves() {
        let (harness, moderator, _user) = setup().await;
        let moderation = &harness.relay.moderation;

        for action in [
            ModerationAction::Block,
            ModerationAction::Unblock,
            ModerationAction::Kick,
        ] {
            let result = moderation
                .execute(&moderator, &general(), action, &moderator.username)
                .await;
            assert!(matches!(result, Err(ApplicationError::InvalidTarget(_))));
        }
    }

    #[tokio::test]
    async fn kick_closes_connection_but_keeps_membership() {
        let (harness, moderator, user) = setup().await;
        let moderation = &harness.relay.moderation;

        let offline = moderation.kick(&moderator, &general(), &user.username).await;
        assert!(matches!(offline, Err(ApplicationError::NotConnected(_))));

        moderation
            .invite(&moderator, &general(), &user.username)
            .await
            .unwrap();
        let mut joined = harness
            .relay
            .registry
            .join(&general(), &user)
            .await
            .unwrap();

        let event = moderation
            .kick(&moderator, &general(), &user.username)
            .await
            .unwrap();
        assert_eq!(event.action(), "disconnect");
        assert_eq!(event.username(), &user.username);
        assert!(joined.handle.is_closed());
        assert_eq!(
            drain(&mut joined.outbound),
            vec!["You have been kicked from channel general".to_string()]
        );
        assert!(is_member(&harness, &user).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_block_and_unblock_are_linearizable() {
        let (harness, moderator, user) = setup().await;
        let harness = Arc::new(harness);
        harness
            .relay
            .moderation
            .invite(&moderator, &general(), &user.username)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..40 {
            let harness = harness.clone();
            let moderator = moderator.clone();
            let target = user.username.clone();
            handles.push(tokio::spawn(async move {
                let moderation = &harness.relay.moderation;
                if i % 2 == 0 {
                    moderation.block(&moderator, &general(), &target).await
                } else {
                    moderation.unblock(&moderator, &general(), &target).await
                }
            }));
        }

        let mut applied: Vec<ChatEvent> = Vec::new();
        for handle in handles {
            if let Ok(event) = handle.await.unwrap() {
                applied.push(event);
            }
        }
        applied.sort_by_key(|event| event.sequence_number);

        // 按序列号回放，每一步都必须是合法的状态转换
        let mut blocked = false;
        for event in &applied {
            match event.action() {
                "block" => {
                    assert!(!blocked);
                    blocked = true;
                }
                "unblock" => {
                    assert!(blocked);
                    blocked = false;
                }
                other => panic!("unexpected action {other}"),
            }
        }
        assert_eq!(is_blocked(&harness, &user).await, blocked);
        assert_eq!(is_member(&harness, &user).await, !blocked);
    }
}
