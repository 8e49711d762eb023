//! 身份解析
//!
//! 真正的会话/令牌校验由外部系统提供；这里只定义接口和一个读取握手参数的实现。

use async_trait::async_trait;
use domain::{HandshakeMetadata, UserId};

/// 从握手元数据中解析用户身份
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, handshake: &HandshakeMetadata) -> Option<UserId>;
}

/// 直接读取握手参数 `userId` / `user_id` 中的用户ID。
///
/// 仅用于开发和测试环境，不做任何校验。
#[derive(Debug, Default, Clone)]
pub struct HandshakeUserIdResolver;

impl HandshakeUserIdResolver {
    const KEYS: [&'static str; 2] = ["userId", "user_id"];
}

#[async_trait]
impl IdentityResolver for HandshakeUserIdResolver {
    async fn resolve(&self, handshake: &HandshakeMetadata) -> Option<UserId> {
        let raw = handshake.first_of(&Self::KEYS)?;
        match raw.parse::<UserId>() {
            Ok(user_id) => Some(user_id),
            Err(err) => {
                tracing::debug!(error = %err, "握手参数中的用户ID无效");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn resolves_user_id_parameter() {
        let id = Uuid::new_v4();
        let handshake = HandshakeMetadata::new().with("userId", id.to_string());
        let resolved = HandshakeUserIdResolver.resolve(&handshake).await;
        assert_eq!(resolved, Some(UserId::from(id)));
    }

    #[tokio::test]
    async fn missing_or_invalid_identity_is_unresolved() {
        let resolver = HandshakeUserIdResolver;
        assert_eq!(resolver.resolve(&HandshakeMetadata::new()).await, None);

        let handshake = HandshakeMetadata::new().with("user_id", "nope");
        assert_eq!(resolver.resolve(&handshake).await, None);
    }
}
