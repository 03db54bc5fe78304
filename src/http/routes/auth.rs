//! 登录登出路由
//!
//! 路由：POST /api/auth/login, POST /api/auth/logout

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::auth::models::{Credentials, LoginAttempt};
use crate::fingerprint::Fingerprint;
use crate::http::routes::bearer_from_headers;
use crate::http::HttpServerState;

/// 创建登录登出路由
pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
}

#[derive(Debug, Default, Deserialize)]
struct LoginBody {
    username: Option<String>,
    password: Option<String>,
}

/// 登录处理器
///
/// 凭证放 JSON body，token 放 Authorization: Bearer。
/// 成功返回 token、联动的 refresh token 和用户信息；
/// 失败统一 401，body 带用户可见的失败消息。
async fn login(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let fingerprint = Fingerprint::from_headers(&headers);
    debug!(
        "登录请求: device={}, browser={}",
        fingerprint.device, fingerprint.browser
    );

    // body 可以为空（纯 token 登录只带 Authorization 头）
    let body: LoginBody = serde_json::from_slice(&body).unwrap_or_default();
    let attempt = LoginAttempt {
        credentials: match (body.username, body.password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        },
        bearer: bearer_from_headers(&headers),
    };

    let mut service = state.login_service(fingerprint);
    if !service.attempt(&attempt).await {
        let message = service
            .error()
            .unwrap_or("Invalid username or password.")
            .to_string();
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })));
    }

    let token = service.token().map(|t| t.to_string());
    let refresh_token = service.refresh_token();
    let user = service.identity().await;

    if let Some(user) = &user {
        info!("登录成功: user_id={}", user.id);
    }

    (
        StatusCode::OK,
        Json(json!({
            "token": token,
            "refreshToken": refresh_token,
            "user": user,
        })),
    )
}

/// 登出处理器
async fn logout(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
) -> Json<Value> {
    let fingerprint = Fingerprint::from_headers(&headers);
    let service = state.login_service(fingerprint);
    service.logout().await;

    Json(json!({ "success": true }))
}
