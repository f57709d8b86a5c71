use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::publisher::BrokerError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("access denied to channel {channel}")]
    AccessDenied { channel: String },
    #[error("you are blocked in channel {channel}")]
    Blocked { channel: String },
    #[error("moderator privileges required")]
    Forbidden,
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("user {0} is not a member of this channel")]
    NotMember(String),
    #[error("user {0} is already a member of this channel")]
    AlreadyMember(String),
    #[error("user {0} is not blocked")]
    NotBlocked(String),
    #[error("user {0} is not connected")]
    NotConnected(String),
    #[error("moderators cannot {0} themselves")]
    InvalidTarget(&'static str),
    #[error("channel {0} does not exist")]
    ChannelNotFound(String),
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(RepositoryError),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Storage(value)
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
