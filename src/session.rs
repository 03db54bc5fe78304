use crate::auth::login_service::{SessionManager, UserDirectory};
use crate::auth::models::Identity;
use crate::error::AuthError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// 请求级会话管理
///
/// 服务是无状态的（登录态由 token 承载），会话只在单次请求的
/// 生命周期内存在：login 记下身份，处理结束即丢弃。
pub struct LocalSessionManager {
    directory: Arc<dyn UserDirectory>,
    current: RwLock<Option<Identity>>,
}

impl LocalSessionManager {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            current: RwLock::new(None),
        }
    }
}

#[async_trait]
impl SessionManager for LocalSessionManager {
    async fn login(&self, identity: &Identity, _duration_secs: i64) -> bool {
        *self.current.write().await = Some(identity.clone());
        true
    }

    async fn login_by_id(&self, user_id: i64) -> bool {
        match self.directory.find_by_id(user_id).await {
            Some(identity) => {
                *self.current.write().await = Some(identity);
                true
            }
            None => false,
        }
    }

    async fn logout(&self) {
        *self.current.write().await = None;
    }

    async fn current_identity(&self) -> Option<Identity> {
        self.current.read().await.clone()
    }
}

/// 未接入账号系统时的占位实现（use_internal_auth = false 且无外部集成）
pub struct DisabledUserDirectory;

#[async_trait]
impl UserDirectory for DisabledUserDirectory {
    async fn authenticate(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<Identity, AuthError> {
        warn!("未配置账号系统，凭证登录不可用（设置 use_internal_auth = true 或接入外部 UserDirectory）");
        Err(AuthError::InvalidCredentials)
    }

    async fn find_by_id(&self, _user_id: i64) -> Option<Identity> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_holds_identity_until_logout() {
        let sessions = LocalSessionManager::new(Arc::new(DisabledUserDirectory));
        let identity = Identity {
            id: 3,
            username: "bob".to_string(),
            email: None,
        };

        assert!(sessions.login(&identity, 3600).await);
        assert_eq!(sessions.current_identity().await.unwrap().id, 3);

        sessions.logout().await;
        assert!(sessions.current_identity().await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_directory_rejects_everything() {
        let directory = DisabledUserDirectory;

        assert!(directory.authenticate("alice", "secret").await.is_err());
        assert!(directory.find_by_id(1).await.is_none());

        let sessions = LocalSessionManager::new(Arc::new(DisabledUserDirectory));
        assert!(!sessions.login_by_id(1).await);
    }
}
