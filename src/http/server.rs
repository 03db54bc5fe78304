//! HTTP 服务器 - 使用 Axum 提供认证服务

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::jwt_codec::JwtCodec;
use crate::auth::login_service::{LoginService, UserDirectory};
use crate::auth::token_service::TokenService;
use crate::config::TokenSettings;
use crate::fingerprint::Fingerprint;
use crate::http::routes;
use crate::repository::TokenRepository;
use crate::session::LocalSessionManager;

/// HTTP 认证服务器共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub repo: Arc<dyn TokenRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub settings: TokenSettings,
    secret: String,
}

impl HttpServerState {
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        users: Arc<dyn UserDirectory>,
        settings: TokenSettings,
    ) -> Self {
        let secret = settings.resolve_secret();
        Self {
            repo,
            users,
            settings,
            secret,
        }
    }

    /// 为单个请求构造 token 服务（绑定该请求的设备指纹）
    pub fn token_service(&self, fingerprint: Fingerprint) -> TokenService {
        let codec = JwtCodec::new(&self.secret, self.settings.site_url.clone());
        TokenService::new(
            self.repo.clone(),
            codec,
            self.settings.clone(),
            fingerprint,
        )
    }

    /// 为单个请求构造登录服务
    pub fn login_service(&self, fingerprint: Fingerprint) -> LoginService {
        let sessions = Arc::new(LocalSessionManager::new(self.users.clone()));
        LoginService::new(
            self.token_service(fingerprint),
            self.users.clone(),
            sessions,
            self.settings.session_duration,
        )
    }
}

/// HTTP 认证服务器
pub struct AuthHttpServer {
    state: HttpServerState,
    host: String,
    port: u16,
}

impl AuthHttpServer {
    pub fn new(state: HttpServerState, host: String, port: u16) -> Self {
        Self { state, host, port }
    }

    /// 启动 HTTP 服务器
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // 构建路由
        let app = Router::new()
            .merge(routes::create_routes())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone());

        // 绑定地址
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("🌐 HTTP 认证服务器启动在 {}", addr);

        // 启动服务器
        let server = axum::serve(listener, app);
        server.await?;

        Ok(())
    }
}
