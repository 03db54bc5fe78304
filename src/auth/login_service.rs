use crate::auth::models::{Identity, LoginAttempt, TokenType};
use crate::auth::token_service::TokenService;
use crate::error::AuthError;
use crate::repository::TokenFilter;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// 外部账号系统：凭证校验与用户查询
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 校验用户名（或邮箱）与密码
    async fn authenticate(&self, username: &str, password: &str)
        -> Result<Identity, AuthError>;

    /// 按 ID 查询用户
    async fn find_by_id(&self, user_id: i64) -> Option<Identity>;
}

/// 外部会话管理：建立/销毁登录态
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// 为身份建立会话
    async fn login(&self, identity: &Identity, duration_secs: i64) -> bool;

    /// 按用户 ID 建立会话
    async fn login_by_id(&self, user_id: i64) -> bool;

    /// 销毁当前会话
    async fn logout(&self);

    /// 当前会话的身份
    async fn current_identity(&self) -> Option<Identity>;
}

/// 登录编排服务（每次认证请求构造一个实例）
///
/// 状态机：凭证分支走外部账号系统，token 分支走 TokenService；
/// 成功后持有命中的 token 供调用方取回。
pub struct LoginService {
    tokens: TokenService,
    users: Arc<dyn UserDirectory>,
    sessions: Arc<dyn SessionManager>,
    session_duration: i64,
    found: Option<crate::auth::models::Token>,
    error: Option<String>,
}

impl LoginService {
    pub fn new(
        tokens: TokenService,
        users: Arc<dyn UserDirectory>,
        sessions: Arc<dyn SessionManager>,
        session_duration: i64,
    ) -> Self {
        Self {
            tokens,
            users,
            sessions,
            session_duration,
            found: None,
            error: None,
        }
    }

    /// 本次登录命中的 token 串
    pub fn token(&self) -> Option<&str> {
        self.found.as_ref().map(|t| t.token.as_str())
    }

    /// 本次登录联动创建的 refresh token 串
    pub fn refresh_token(&self) -> Option<String> {
        self.found
            .as_ref()
            .and_then(|t| self.tokens.created_refresh_token(t))
    }

    /// 失败原因（用户可见消息）
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    /// 当前会话的身份（登录成功后可用）
    pub async fn identity(&self) -> Option<Identity> {
        self.sessions.current_identity().await
    }

    /// 按请求携带的信息自动选择登录方式
    pub async fn attempt(&mut self, request: &LoginAttempt) -> bool {
        if let Some(credentials) = &request.credentials {
            return self
                .login_by_credentials(&credentials.username, &credentials.password)
                .await;
        }

        if let Some(token) = &request.bearer {
            return self.login_by_token(token).await;
        }

        self.error = Some("Could not find any login information.".to_string());
        false
    }

    /// 凭证登录
    pub async fn login_by_credentials(&mut self, username: &str, password: &str) -> bool {
        let identity = match self.users.authenticate(username, password).await {
            Ok(identity) => identity,
            Err(code) => return self.handle_failure(Some(code)),
        };

        if !self.sessions.login(&identity, self.session_duration).await {
            return self.handle_failure(None);
        }

        self.handle_success(true).await
    }

    /// token 登录
    ///
    /// Login token 不通过时，尝试把一次性登录 token 兑换成新的
    /// Login token 再验一次 —— 显式两步，单跳，不递归。
    pub async fn login_by_token(&mut self, token: &str) -> bool {
        match self.tokens.validate(token, Some(TokenType::Login)).await {
            Ok(_) => self.login_by_login_token(token).await,
            Err(err) => {
                if let Some(new_token) = self.exchange_one_time_token(token).await {
                    // 新 token 绑定当前指纹、类型为 Login，必然通过下面的校验
                    return self.login_by_login_token(&new_token).await;
                }
                self.error = Some(err.to_string());
                false
            }
        }
    }

    /// 用已通过类型校验的 Login token 建立会话
    async fn login_by_login_token(&mut self, token: &str) -> bool {
        if let Err(err) = self.tokens.validate(token, Some(TokenType::Login)).await {
            self.error = Some(err.to_string());
            return false;
        }
        if self.tokens.is_expired(token) {
            self.error = Some(crate::error::TokenError::Expired.to_string());
            return false;
        }

        let payload = match self.tokens.payload(token) {
            Ok(payload) => payload,
            Err(err) => {
                self.error = Some(err.to_string());
                return false;
            }
        };
        let Some(user_id) = payload.get("userId").and_then(Value::as_i64) else {
            self.error = Some(crate::error::TokenError::NoData.to_string());
            return false;
        };

        if !self.sessions.login_by_id(user_id).await {
            return self.handle_failure(None);
        }

        self.handle_success(false).await
    }

    /// 一次性登录 token 兑换（单跳）
    ///
    /// 兑换途中的失败不对外区分细节，统一落回调用方记录的
    /// 校验错误，避免对 token 结构形成探测口。
    async fn exchange_one_time_token(&mut self, token: &str) -> Option<String> {
        self.tokens
            .validate(token, Some(TokenType::OneTimeLogin))
            .await
            .ok()?;

        if self.tokens.is_expired(token) {
            return None;
        }

        let payload = self.tokens.payload(token).ok()?;
        let user_id = payload.get("userId").and_then(Value::as_i64)?;

        let new_login = self
            .tokens
            .issue_for_user(user_id, TokenType::Login, Map::new())
            .await
            .ok()?;

        // 兑换即作废
        if let Err(e) = self
            .tokens
            .delete_by(
                &TokenFilter::new()
                    .token_type(TokenType::OneTimeLogin)
                    .user_id(user_id)
                    .token(token),
            )
            .await
        {
            warn!("一次性登录 token 删除失败: {}", e);
        }

        debug!("一次性登录 token 已兑换: user_id={}", user_id);
        Some(new_login.token)
    }

    /// 登录成功收尾
    ///
    /// create_new: 凭证登录总是签发新 token；token 复用路径先找
    /// 当前设备上已有的 Login token，有效则复用并计一次使用，
    /// 否则补发新的。
    async fn handle_success(&mut self, create_new: bool) -> bool {
        let Some(user) = self.sessions.current_identity().await else {
            // 会话刚建立却拿不到身份，不应该发生
            return self.handle_failure(None);
        };

        if !create_new {
            if let Ok(Some(mut existing)) =
                self.tokens.find_for_user(user.id, TokenType::Login).await
            {
                let valid = self.tokens.validate(&existing.token, None).await.is_ok();
                if valid && !self.tokens.is_expired(&existing.token) {
                    if let Err(e) = self.tokens.update_usage(&mut existing).await {
                        warn!("token 使用计数更新失败: {}", e);
                    }
                    self.found = Some(existing);
                    return true;
                }
            }
        }

        match self
            .tokens
            .issue_for_user(user.id, TokenType::Login, Map::new())
            .await
        {
            Ok(token) => {
                self.found = Some(token);
                true
            }
            Err(err) => {
                self.error = Some(err.to_string());
                false
            }
        }
    }

    /// 登录失败收尾：认证失败代码映射为用户可见消息
    fn handle_failure(&mut self, code: Option<AuthError>) -> bool {
        let message = code.unwrap_or(AuthError::InvalidCredentials).to_string();
        self.error = Some(message);
        false
    }

    /// 登出
    pub async fn logout(&self) {
        self.sessions.logout().await;
    }
}
