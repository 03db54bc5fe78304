use crate::auth::jwt_codec::JwtCodec;
use crate::auth::models::{Token, TokenType};
use crate::config::TokenSettings;
use crate::error::{Result, TokenError};
use crate::fingerprint::Fingerprint;
use crate::repository::{TokenFilter, TokenRepository};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Token 生命周期服务（每次认证请求构造一个实例）
///
/// 签发、校验、过期判断、轮换、使用计数都在这里。
/// 持有当前请求的设备指纹：新 token 在签发时绑定它，
/// Login token 在校验时比对它。
pub struct TokenService {
    repo: Arc<dyn TokenRepository>,
    codec: JwtCodec,
    settings: TokenSettings,
    fingerprint: Fingerprint,
    /// 本次请求内创建的 refresh token，按父 token ID 索引
    created_refresh: Mutex<HashMap<i64, Token>>,
}

impl TokenService {
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        codec: JwtCodec,
        settings: TokenSettings,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            repo,
            codec,
            settings,
            fingerprint,
            created_refresh: Mutex::new(HashMap::new()),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    // ------------------------------------------------------------------
    // 签发
    // ------------------------------------------------------------------

    /// 签发新 token
    ///
    /// user_id 缺省时从 contents.userId 推导。带用户的签发会先
    /// 原子替换同 (user, type, device, browser) 元组的旧 token。
    /// 非 refresh 类型且配置开启时，联动签发一条 refresh token
    /// （relatedId 指向新 token），可用 `created_refresh_token` 取回。
    pub async fn issue(
        &self,
        token_type: TokenType,
        contents: Map<String, Value>,
        user_id: Option<i64>,
    ) -> Result<Token> {
        let user_id =
            user_id.or_else(|| contents.get("userId").and_then(Value::as_i64));

        let mut draft = Token::new(token_type, contents, user_id, &self.fingerprint);
        draft.token = self
            .codec
            .sign(&draft.contents, self.settings.ttl_for(token_type))?;

        let stored = match user_id {
            // 同元组至多一条：删除旧行 + 插入新行在一个事务内完成
            Some(user_id) => {
                let tuple = TokenFilter::new()
                    .token_type(token_type)
                    .user_id(user_id)
                    .device(draft.device.clone())
                    .browser(draft.browser.clone());
                self.repo.replace(&tuple, &draft).await?
            }
            None => self.repo.insert(&draft).await?,
        };

        debug!(
            "token 已签发: id={}, type={}, user_id={:?}, device={}/{}",
            stored.id, stored.token_type, stored.user_id, stored.device, stored.browser
        );

        if token_type != TokenType::Refresh && self.settings.refresh_tokens {
            self.issue_linked_refresh(&stored).await?;
        }

        Ok(stored)
    }

    /// 为用户签发 token，userId 并入负载
    pub async fn issue_for_user(
        &self,
        user_id: i64,
        token_type: TokenType,
        mut contents: Map<String, Value>,
    ) -> Result<Token> {
        contents.insert("userId".to_string(), json!(user_id));
        self.issue(token_type, contents, Some(user_id)).await
    }

    /// 取回本次请求内为某个 token 联动创建的 refresh token 串
    pub fn created_refresh_token(&self, parent: &Token) -> Option<String> {
        self.created_refresh
            .lock()
            .get(&parent.id)
            .map(|t| t.token.clone())
    }

    /// 联动签发 refresh token（不递归：refresh 自身不再联动）
    async fn issue_linked_refresh(&self, parent: &Token) -> Result<()> {
        let mut contents = Map::new();
        contents.insert("relatedId".to_string(), json!(parent.id));

        let mut draft = Token::new(TokenType::Refresh, contents, None, &self.fingerprint);
        draft.related_id = Some(parent.id);
        draft.token = self
            .codec
            .sign(&draft.contents, self.settings.ttl_for(TokenType::Refresh))?;

        let stored = self.repo.insert(&draft).await?;
        debug!("refresh token 已联动签发: id={}, related_id={}", stored.id, parent.id);
        self.created_refresh.lock().insert(parent.id, stored);
        Ok(())
    }

    // ------------------------------------------------------------------
    // 校验
    // ------------------------------------------------------------------

    /// 校验 token，返回命中的记录
    ///
    /// 检查顺序：存在 -> 类型 -> 设备绑定。设备/浏览器绑定只对
    /// Login 类型生效：OneTimeLogin 要能跨设备兑换（邮件链接），
    /// Refresh 只服务于重签 —— 这个不对称是既定策略，不是缺陷。
    pub async fn validate(
        &self,
        token: &str,
        expected_type: Option<TokenType>,
    ) -> Result<Token> {
        let found = self
            .repo
            .find(&TokenFilter::new().token(token))
            .await?
            .ok_or(TokenError::NotFound)?;

        if let Some(expected) = expected_type {
            if found.token_type != expected {
                return Err(TokenError::TypeMismatch);
            }
        }

        if found.token_type == TokenType::Login
            && (found.device != self.fingerprint.device
                || found.browser != self.fingerprint.browser)
        {
            debug!(
                "设备绑定不匹配: token={}/{}, 当前={}/{}",
                found.device, found.browser, self.fingerprint.device, self.fingerprint.browser
            );
            return Err(TokenError::DeviceMismatch);
        }

        Ok(found)
    }

    /// token 是否过期
    ///
    /// 只有解码失败原因恰为过期时才算过期；签名错误等其他
    /// 解码失败不算 —— 过期与有效性是两个独立的检查。
    pub fn is_expired(&self, token: &str) -> bool {
        matches!(self.codec.verify(token), Err(TokenError::Expired))
    }

    /// 解码并返回 data 负载
    pub fn payload(&self, token: &str) -> Result<Map<String, Value>> {
        let claims = self.codec.verify(token)?;
        if claims.data.is_empty() {
            return Err(TokenError::NoData);
        }
        Ok(claims.data)
    }

    // ------------------------------------------------------------------
    // 轮换与使用计数
    // ------------------------------------------------------------------

    /// 轮换：用原有负载和新的有效期重签，原地改写 token 字段
    ///
    /// ID 和 relatedId 不变。
    pub async fn refresh(&self, token: &mut Token) -> Result<()> {
        token.token = self
            .codec
            .sign(&token.contents, self.settings.ttl_for(token.token_type))?;
        self.save(token).await
    }

    /// 使用计数 +1 并记录使用时间
    pub async fn update_usage(&self, token: &mut Token) -> Result<()> {
        token.times_used += 1;
        token.date_used = Some(chrono::Utc::now());
        self.save(token).await
    }

    async fn save(&self, token: &mut Token) -> Result<()> {
        let previous_updated = token.date_updated;
        token.date_updated = chrono::Utc::now();

        if !self.repo.update(token, previous_updated).await? {
            token.date_updated = previous_updated;
            return Err(TokenError::Persistence(format!(
                "no JWT exists with the ID \"{}\", or it was concurrently modified",
                token.id
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 查询与删除
    // ------------------------------------------------------------------

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Token>> {
        self.repo.find_by_id(id).await
    }

    /// 按 token 串查找，可限定类型
    pub async fn find_one(
        &self,
        token: &str,
        token_type: Option<TokenType>,
    ) -> Result<Option<Token>> {
        let mut filter = TokenFilter::new().token(token);
        if let Some(token_type) = token_type {
            filter = filter.token_type(token_type);
        }
        self.repo.find(&filter).await
    }

    /// 查找某用户在当前设备/浏览器下的 token
    pub async fn find_for_user(
        &self,
        user_id: i64,
        token_type: TokenType,
    ) -> Result<Option<Token>> {
        self.repo
            .find(
                &TokenFilter::new()
                    .user_id(user_id)
                    .token_type(token_type)
                    .device(self.fingerprint.device.clone())
                    .browser(self.fingerprint.browser.clone()),
            )
            .await
    }

    /// 某用户的全部 token（最新在前），可限定类型
    pub async fn find_all_for_user(
        &self,
        user_id: i64,
        token_type: Option<TokenType>,
    ) -> Result<Vec<Token>> {
        let mut filter = TokenFilter::new().user_id(user_id);
        if let Some(token_type) = token_type {
            filter = filter.token_type(token_type);
        }
        self.repo.find_all(&filter).await
    }

    /// 按过滤器批量删除（比如移除已兑换的一次性登录 token）
    pub async fn delete_by(&self, filter: &TokenFilter) -> Result<u64> {
        self.repo.delete_by(filter).await
    }

    // ------------------------------------------------------------------
    // Refresh 兑换
    // ------------------------------------------------------------------

    /// 用 refresh token 重签它关联的 token，返回新签名串
    ///
    /// refresh token 自身只做使用计数，签名从不在这条路径上轮换。
    pub async fn use_refresh(&self, token: &str) -> Result<String> {
        self.validate(token, Some(TokenType::Refresh)).await?;

        let payload = self.payload(token)?;
        let related_id = payload
            .get("relatedId")
            .and_then(Value::as_i64)
            .ok_or(TokenError::NoData)?;

        let mut related = self
            .find_by_id(related_id)
            .await?
            .ok_or(TokenError::NotFound)?;

        self.refresh(&mut related).await?;

        // 使用计数记在 refresh token 自己身上
        match self
            .find_one(token, Some(TokenType::Refresh))
            .await?
        {
            Some(mut refresh_row) => {
                if let Err(e) = self.update_usage(&mut refresh_row).await {
                    warn!("refresh token 使用计数更新失败: {}", e);
                }
            }
            None => warn!("refresh token 记录在重签后消失: related_id={}", related_id),
        }

        Ok(related.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryTokenRepository;

    fn phone_safari() -> Fingerprint {
        Fingerprint {
            device: "phone".to_string(),
            browser: "safari".to_string(),
            user_agent: "test-agent".to_string(),
        }
    }

    fn tablet_chrome() -> Fingerprint {
        Fingerprint {
            device: "tablet".to_string(),
            browser: "chrome".to_string(),
            user_agent: "other-agent".to_string(),
        }
    }

    fn service_with(repo: Arc<dyn TokenRepository>, fp: Fingerprint) -> TokenService {
        let settings = TokenSettings::default();
        let codec = JwtCodec::new(&settings.resolve_secret(), settings.site_url.clone());
        TokenService::new(repo, codec, settings, fp)
    }

    fn service_without_refresh(
        repo: Arc<dyn TokenRepository>,
        fp: Fingerprint,
    ) -> TokenService {
        let settings = TokenSettings {
            refresh_tokens: false,
            ..Default::default()
        };
        let codec = JwtCodec::new(&settings.resolve_secret(), settings.site_url.clone());
        TokenService::new(repo, codec, settings, fp)
    }

    #[tokio::test]
    async fn test_issue_creates_login_and_refresh_pair() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_with(repo.clone(), phone_safari());

        let login = service
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();

        let all = repo.find_all(&TokenFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let refresh = repo
            .find(&TokenFilter::new().token_type(TokenType::Refresh))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refresh.related_id, Some(login.id));
        assert_eq!(
            refresh.contents.get("relatedId").and_then(Value::as_i64),
            Some(login.id)
        );
        assert_eq!(
            service.created_refresh_token(&login),
            Some(refresh.token.clone())
        );
    }

    #[tokio::test]
    async fn test_issue_replaces_same_tuple() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_without_refresh(repo.clone(), phone_safari());

        let first = service
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();
        let second = service
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();

        assert!(repo.find_by_id(first.id).await.unwrap().is_none());
        let all = repo.find_all(&TokenFilter::new().user_id(5)).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, second.id);
    }

    #[tokio::test]
    async fn test_issue_keeps_other_devices() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());

        let on_phone = service_without_refresh(repo.clone(), phone_safari());
        on_phone
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();

        let on_tablet = service_without_refresh(repo.clone(), tablet_chrome());
        on_tablet
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();

        // 不同设备元组互不替换
        let all = repo.find_all(&TokenFilter::new().user_id(5)).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_validate_checks_device_binding_for_login_only() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());

        let issuer = service_without_refresh(repo.clone(), phone_safari());
        let login = issuer
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();
        let one_time = issuer
            .issue_for_user(5, TokenType::OneTimeLogin, Map::new())
            .await
            .unwrap();

        // 换了设备：Login 被拒，OneTimeLogin 照常通过
        let elsewhere = service_without_refresh(repo.clone(), tablet_chrome());
        assert_eq!(
            elsewhere
                .validate(&login.token, Some(TokenType::Login))
                .await
                .unwrap_err(),
            TokenError::DeviceMismatch
        );
        assert!(elsewhere
            .validate(&one_time.token, Some(TokenType::OneTimeLogin))
            .await
            .is_ok());

        // 原设备上一切正常
        assert!(issuer
            .validate(&login.token, Some(TokenType::Login))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_validate_unknown_token() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_with(repo, phone_safari());

        assert_eq!(
            service.validate("no-such-token", None).await.unwrap_err(),
            TokenError::NotFound
        );
    }

    #[tokio::test]
    async fn test_validate_type_mismatch() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_without_refresh(repo, phone_safari());

        let one_time = service
            .issue_for_user(5, TokenType::OneTimeLogin, Map::new())
            .await
            .unwrap();

        assert_eq!(
            service
                .validate(&one_time.token, Some(TokenType::Login))
                .await
                .unwrap_err(),
            TokenError::TypeMismatch
        );
    }

    #[tokio::test]
    async fn test_is_expired_is_independent_from_validate() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let issuer = service_without_refresh(repo.clone(), phone_safari());
        let login = issuer
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();

        // 设备不匹配导致校验失败，但过期检查依然为 false
        let elsewhere = service_without_refresh(repo.clone(), tablet_chrome());
        assert!(elsewhere
            .validate(&login.token, Some(TokenType::Login))
            .await
            .is_err());
        assert!(!elsewhere.is_expired(&login.token));

        // 签名错误同样不算过期
        assert!(!issuer.is_expired("invalid.token.here"));
    }

    #[tokio::test]
    async fn test_payload_round_trip() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_without_refresh(repo, phone_safari());

        let login = service
            .issue_for_user(7, TokenType::Login, Map::new())
            .await
            .unwrap();

        let payload = service.payload(&login.token).unwrap();
        assert_eq!(payload.get("userId").and_then(Value::as_i64), Some(7));
    }

    #[tokio::test]
    async fn test_payload_without_data() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_without_refresh(repo, phone_safari());

        let empty = service
            .issue(TokenType::Login, Map::new(), None)
            .await
            .unwrap();

        assert_eq!(
            service.payload(&empty.token).unwrap_err(),
            TokenError::NoData
        );
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry_in_place() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let settings = TokenSettings {
            refresh_tokens: false,
            tokens_expire_after: 60,
            ..Default::default()
        };
        let codec = JwtCodec::new(&settings.resolve_secret(), settings.site_url.clone());
        let service = TokenService::new(repo.clone(), codec, settings.clone(), phone_safari());

        let mut login = service
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();
        let codec = JwtCodec::new(&settings.resolve_secret(), settings.site_url.clone());
        let before = codec.verify(&login.token).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let old_id = login.id;
        service.refresh(&mut login).await.unwrap();

        let after = codec.verify(&login.token).unwrap();
        assert!(after.exp > before.exp);
        assert_eq!(login.id, old_id);
        assert_eq!(login.related_id, None);

        // 存储里的记录同步改写
        let stored = repo.find_by_id(old_id).await.unwrap().unwrap();
        assert_eq!(stored.token, login.token);
    }

    #[tokio::test]
    async fn test_update_usage() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_without_refresh(repo.clone(), phone_safari());

        let mut login = service
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();
        assert_eq!(login.times_used, 0);

        service.update_usage(&mut login).await.unwrap();
        service.update_usage(&mut login).await.unwrap();

        let stored = repo.find_by_id(login.id).await.unwrap().unwrap();
        assert_eq!(stored.times_used, 2);
        assert!(stored.date_used.is_some());
    }

    #[tokio::test]
    async fn test_delete_by_removes_spent_one_time_token() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_without_refresh(repo, phone_safari());

        let one_time = service
            .issue_for_user(5, TokenType::OneTimeLogin, Map::new())
            .await
            .unwrap();

        let removed = service
            .delete_by(
                &TokenFilter::new()
                    .token_type(TokenType::OneTimeLogin)
                    .user_id(5)
                    .token(one_time.token.clone()),
            )
            .await
            .unwrap();
        assert_eq!(removed, 1);

        assert_eq!(
            service
                .validate(&one_time.token, Some(TokenType::OneTimeLogin))
                .await
                .unwrap_err(),
            TokenError::NotFound
        );
    }

    #[tokio::test]
    async fn test_use_refresh_rotates_related_token() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_with(repo.clone(), phone_safari());

        let login = service
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();
        let refresh_token = service.created_refresh_token(&login).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let new_token = service.use_refresh(&refresh_token).await.unwrap();

        // 关联 token 原地轮换
        let stored = repo.find_by_id(login.id).await.unwrap().unwrap();
        assert_eq!(stored.token, new_token);
        assert_ne!(stored.token, login.token);

        // refresh token 自身签名未动，只记了一次使用
        let refresh_row = repo
            .find(&TokenFilter::new().token_type(TokenType::Refresh))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refresh_row.token, refresh_token);
        assert_eq!(refresh_row.times_used, 1);
    }

    #[tokio::test]
    async fn test_use_refresh_rejects_login_token() {
        let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
        let service = service_with(repo, phone_safari());

        let login = service
            .issue_for_user(5, TokenType::Login, Map::new())
            .await
            .unwrap();

        assert_eq!(
            service.use_refresh(&login.token).await.unwrap_err(),
            TokenError::TypeMismatch
        );
    }
}
