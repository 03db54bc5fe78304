//! 登录全流程集成测试
//!
//! 走内存存储，覆盖：凭证登录签发 token 对、token 复用登录、
//! 一次性登录 token 兑换、refresh token 兑换重签。

use async_trait::async_trait;
use jwtgate::auth::login_service::{LoginService, SessionManager, UserDirectory};
use jwtgate::auth::models::{Identity, TokenType};
use jwtgate::auth::{JwtCodec, TokenService};
use jwtgate::config::TokenSettings;
use jwtgate::error::AuthError;
use jwtgate::fingerprint::Fingerprint;
use jwtgate::repository::{MemoryTokenRepository, TokenFilter, TokenRepository};
use jwtgate::session::LocalSessionManager;
use serde_json::{Map, Value};
use std::sync::Arc;

/// 固定用户表
struct FixtureDirectory;

#[async_trait]
impl UserDirectory for FixtureDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, AuthError> {
        if username == "alice" && password == "correct horse" {
            Ok(Identity {
                id: 7,
                username: "alice".to_string(),
                email: Some("alice@example.com".to_string()),
            })
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    async fn find_by_id(&self, user_id: i64) -> Option<Identity> {
        (user_id == 7).then(|| Identity {
            id: 7,
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
        })
    }
}

fn phone_safari() -> Fingerprint {
    Fingerprint {
        device: "phone".to_string(),
        browser: "safari".to_string(),
        user_agent: "Mozilla/5.0 (iPhone) Version/17.0 Mobile Safari".to_string(),
    }
}

fn token_service(repo: Arc<dyn TokenRepository>, fp: Fingerprint) -> TokenService {
    let settings = TokenSettings::default();
    let codec = JwtCodec::new(&settings.resolve_secret(), settings.site_url.clone());
    TokenService::new(repo, codec, settings, fp)
}

fn login_service(repo: Arc<dyn TokenRepository>, fp: Fingerprint) -> LoginService {
    let settings = TokenSettings::default();
    let users: Arc<dyn UserDirectory> = Arc::new(FixtureDirectory);
    let sessions = Arc::new(LocalSessionManager::new(users.clone()));
    LoginService::new(
        token_service(repo, fp),
        users,
        sessions,
        settings.session_duration,
    )
}

#[tokio::test]
async fn test_credential_login_issues_token_pair() {
    let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());
    let mut service = login_service(repo.clone(), phone_safari());

    assert!(service.login_by_credentials("alice", "correct horse").await);
    assert!(service.error().is_none());

    // Login token 绑定用户和设备
    let token = service.token().expect("login token").to_string();
    let login_row = repo
        .find(&TokenFilter::new().token(token.clone()))
        .await
        .unwrap()
        .expect("login row");
    assert_eq!(login_row.token_type, TokenType::Login);
    assert_eq!(login_row.user_id, Some(7));
    assert_eq!(login_row.device, "phone");
    assert_eq!(login_row.browser, "safari");

    // 负载里有 userId
    let payload = service.token_service().payload(&token).unwrap();
    assert_eq!(payload.get("userId").and_then(Value::as_i64), Some(7));

    // 联动的 refresh token：独立一条，relatedId 指向 Login 行
    let refresh = service.refresh_token().expect("refresh token");
    assert_ne!(refresh, token);
    let refresh_row = repo
        .find(&TokenFilter::new().token(refresh.clone()))
        .await
        .unwrap()
        .expect("refresh row");
    assert_eq!(refresh_row.token_type, TokenType::Refresh);
    assert_eq!(refresh_row.related_id, Some(login_row.id));

    let refresh_payload = service.token_service().payload(&refresh).unwrap();
    assert_eq!(
        refresh_payload.get("relatedId").and_then(Value::as_i64),
        Some(login_row.id)
    );

    // 身份信息可取回
    let identity = service.identity().await.expect("identity");
    assert_eq!(identity.username, "alice");
}

#[tokio::test]
async fn test_relogin_replaces_token_on_same_device() {
    let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());

    let mut first = login_service(repo.clone(), phone_safari());
    assert!(first.login_by_credentials("alice", "correct horse").await);
    let old_token = first.token().unwrap().to_string();

    let mut second = login_service(repo.clone(), phone_safari());
    assert!(second.login_by_credentials("alice", "correct horse").await);

    // 同设备重复登录：旧 token（连同它的 refresh）被替换掉
    assert!(repo
        .find(&TokenFilter::new().token(old_token))
        .await
        .unwrap()
        .is_none());

    let all = repo.find_all(&TokenFilter::new()).await.unwrap();
    assert_eq!(all.len(), 2); // 新的 Login + 新的 Refresh
}

#[tokio::test]
async fn test_token_login_reuses_and_counts_usage() {
    let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());

    let mut first = login_service(repo.clone(), phone_safari());
    assert!(first.login_by_credentials("alice", "correct horse").await);
    let token = first.token().unwrap().to_string();

    let mut second = login_service(repo.clone(), phone_safari());
    assert!(second.login_by_token(&token).await);
    assert_eq!(second.token(), Some(token.as_str()));

    let row = repo
        .find(&TokenFilter::new().token(token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.times_used, 1);
    assert!(row.date_used.is_some());
}

#[tokio::test]
async fn test_one_time_login_token_exchange() {
    let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());

    // 用桌面端签发一次性登录 token（模拟邮件链接场景），手机端兑换
    let issuer = token_service(
        repo.clone(),
        Fingerprint {
            device: "desktop".to_string(),
            browser: "chrome".to_string(),
            user_agent: "Mozilla/5.0 Chrome/120.0".to_string(),
        },
    );
    let one_time = issuer
        .issue_for_user(7, TokenType::OneTimeLogin, Map::new())
        .await
        .unwrap();

    let mut service = login_service(repo.clone(), phone_safari());
    assert!(service.login_by_token(&one_time.token).await);

    // 换到的是绑定当前设备的新 Login token
    let new_token = service.token().unwrap();
    let row = repo
        .find(&TokenFilter::new().token(new_token))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.token_type, TokenType::Login);
    assert_eq!(row.user_id, Some(7));
    assert_eq!(row.device, "phone");

    // 一次性 token 兑换后即删除，再次兑换失败
    assert!(repo
        .find(&TokenFilter::new().token(one_time.token.clone()))
        .await
        .unwrap()
        .is_none());

    let mut replay = login_service(repo.clone(), phone_safari());
    assert!(!replay.login_by_token(&one_time.token).await);
}

#[tokio::test]
async fn test_use_refresh_rotates_login_token() {
    let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());

    let mut login = login_service(repo.clone(), phone_safari());
    assert!(login.login_by_credentials("alice", "correct horse").await);
    let login_token = login.token().unwrap().to_string();
    let refresh_token = login.refresh_token().unwrap();

    // iat 秒级精度，隔开一点让重签后的签名可见地变化
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let service = token_service(repo.clone(), phone_safari());
    let rotated = service.use_refresh(&refresh_token).await.unwrap();

    assert_ne!(rotated, login_token);

    // 旧签名串已不在库里，新的可以直接登录
    assert!(repo
        .find(&TokenFilter::new().token(login_token))
        .await
        .unwrap()
        .is_none());

    let mut relogin = login_service(repo.clone(), phone_safari());
    assert!(relogin.login_by_token(&rotated).await);

    // refresh token 自身签名不变，使用计数加一
    let refresh_row = repo
        .find(&TokenFilter::new().token(refresh_token))
        .await
        .unwrap()
        .expect("refresh row survives rotation");
    assert_eq!(refresh_row.times_used, 1);
}

#[tokio::test]
async fn test_login_token_rejected_from_other_device() {
    let repo: Arc<dyn TokenRepository> = Arc::new(MemoryTokenRepository::new());

    let mut phone = login_service(repo.clone(), phone_safari());
    assert!(phone.login_by_credentials("alice", "correct horse").await);
    let token = phone.token().unwrap().to_string();

    let mut desktop = login_service(
        repo,
        Fingerprint {
            device: "desktop".to_string(),
            browser: "firefox".to_string(),
            user_agent: "Mozilla/5.0 Firefox/121.0".to_string(),
        },
    );

    assert!(!desktop.login_by_token(&token).await);
    assert_eq!(desktop.error(), Some("The JWT is not bound to this device."));
}
