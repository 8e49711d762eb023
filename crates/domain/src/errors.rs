//! 领域模型错误

use thiserror::Error;

/// 输入在进入持久化之前就被拒绝的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },
}

impl DomainError {
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 出错的字段名
    pub fn field(&self) -> &str {
        match self {
            Self::ValidationError { field, .. } => field,
        }
    }
}
