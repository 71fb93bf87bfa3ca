use domain::{DomainError, NotificationId, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("connection is not authenticated")]
    Unauthenticated,
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("persist failed: {0}")]
    PersistFailed(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("connection already registered")]
    AlreadyRegistered,
    #[error("notification {0} already expired")]
    AlreadyExpired(NotificationId),
    #[error("channel {channel} send failed: {message}")]
    ChannelSendFailed { channel: String, message: String },
    #[error("validation failed: {0}")]
    Validation(String),
}

impl ApplicationError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ApplicationError::NotFound(what.to_string())
    }

    pub fn not_authorized(action: impl Into<String>) -> Self {
        ApplicationError::NotAuthorized(action.into())
    }

    /// 写操作失败，统一归为 PersistFailed
    pub fn persist(err: RepositoryError) -> Self {
        ApplicationError::PersistFailed(err.to_string())
    }

    /// 出站 `error` 事件中使用的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            ApplicationError::Unauthenticated => "UNAUTHENTICATED",
            ApplicationError::NotAuthorized(_) => "NOT_AUTHORIZED",
            ApplicationError::NotFound(_) => "NOT_FOUND",
            ApplicationError::PersistFailed(_) => "PERSIST_FAILED",
            ApplicationError::Storage(_) => "STORAGE_ERROR",
            ApplicationError::AlreadyRegistered => "ALREADY_REGISTERED",
            ApplicationError::AlreadyExpired(_) => "ALREADY_EXPIRED",
            ApplicationError::ChannelSendFailed { .. } => "CHANNEL_SEND_FAILED",
            ApplicationError::Validation(_) => "VALIDATION_FAILED",
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::ValidationError { .. } | DomainError::BusinessRuleViolation { .. } => {
                ApplicationError::Validation(value.to_string())
            }
            DomainError::ResourceNotFound {
                resource_type,
                resource_id,
            } => ApplicationError::NotFound(format!("{resource_type} {resource_id}")),
            DomainError::PermissionDenied { action } => ApplicationError::NotAuthorized(action),
        }
    }
}

/// 读操作的存储错误
impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound("record".to_string()),
            other => ApplicationError::Storage(other.to_string()),
        }
    }
}
