use domain::{ConnectionId, DomainError};
use thiserror::Error;

/// 外部持久化协作方的错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PersistenceError {
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
}

impl PersistenceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

/// 单个连接的推送失败。只记录日志，不向上传播，也不重试。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    #[error("delivery to connection {0} timed out")]
    Timeout(ConnectionId),
    #[error("outbound queue of connection {0} is full")]
    QueueFull(ConnectionId),
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("identity could not be resolved from the handshake")]
    IdentityUnresolved,
    #[error("reconnect sync failed: {0}")]
    SyncFailed(String),
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] PersistenceError),
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("event bridge is closed")]
    BridgeClosed,
}

impl ApplicationError {
    pub fn sync_failed(message: impl Into<String>) -> Self {
        ApplicationError::SyncFailed(message.into())
    }
}
