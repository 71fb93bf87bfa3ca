//! 领域模型错误定义
//!
//! 定义了实时协作核心中领域层与存储协作方可能产生的错误类型。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 验证错误
    #[error("validation failed: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 资源不存在错误
    #[error("{resource_type} {resource_id} not found")]
    ResourceNotFound {
        resource_type: String,
        resource_id: String,
    },

    /// 权限错误
    #[error("permission denied: {action}")]
    PermissionDenied { action: String },

    /// 业务规则违反错误
    #[error("business rule violated: {rule}")]
    BusinessRuleViolation { rule: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建资源不存在错误
    pub fn resource_not_found(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self::ResourceNotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// 创建权限错误
    pub fn permission_denied(action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action: action.into(),
        }
    }

    /// 创建业务规则违反错误
    pub fn business_rule_violation(rule: impl Into<String>) -> Self {
        Self::BusinessRuleViolation { rule: rule.into() }
    }
}

impl From<validator::ValidationErrors> for DomainError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|key| key.to_string())
            .unwrap_or_else(|| "payload".to_string());
        Self::ValidationError {
            field,
            message: errors.to_string(),
        }
    }
}

/// 存储协作方错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储操作结果类型
pub type RepositoryResult<T> = Result<T, RepositoryError>;
