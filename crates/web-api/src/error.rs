use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.body.message
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        let message = error.to_string();
        match error {
            AppErr::AccessDenied { .. } => {
                ApiError::new(StatusCode::FORBIDDEN, "ACCESS_DENIED", message)
            }
            AppErr::Blocked { .. } => ApiError::new(StatusCode::FORBIDDEN, "BLOCKED", message),
            AppErr::Forbidden => ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
            AppErr::NotMember(_) => ApiError::new(StatusCode::FORBIDDEN, "NOT_MEMBER", message),
            AppErr::UnknownUser(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "USER_NOT_FOUND", message)
            }
            AppErr::ChannelNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "CHANNEL_NOT_FOUND", message)
            }
            AppErr::NotConnected(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_CONNECTED", message)
            }
            AppErr::AlreadyMember(_) => {
                ApiError::new(StatusCode::CONFLICT, "MEMBERSHIP_EXISTS", message)
            }
            AppErr::NotBlocked(_) => ApiError::new(StatusCode::CONFLICT, "NOT_BLOCKED", message),
            AppErr::InvalidTarget(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_TARGET", message)
            }
            AppErr::Domain(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
            }
            AppErr::BrokerUnavailable(_) => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "BROKER_UNAVAILABLE", message)
            }
            AppErr::MalformedEvent(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "MALFORMED_EVENT", message)
            }
            AppErr::Storage(repo_err) => match repo_err {
                domain::RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                domain::RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                domain::RepositoryError::Storage { message } => ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    format!("database error: {}", message),
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
