//! HTTP 路由模块
//!
//! 路由结构：
//! - `/api/auth/login` - 登录（凭证 / Bearer token / 一次性登录 token）
//! - `/api/auth/logout` - 登出
//! - `/api/tokens/use-refresh` - refresh token 兑换

pub mod auth;
pub mod tokens;

use crate::http::HttpServerState;
use axum::http::HeaderMap;
use axum::Router;

/// 创建所有路由
pub fn create_routes() -> Router<HttpServerState> {
    Router::new()
        .merge(auth::create_route())   // /api/auth/* - 登录登出
        .merge(tokens::create_route()) // /api/tokens/* - refresh 兑换
}

/// 从 Authorization header 提取 Bearer token
pub(crate) fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("Authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then(|| token.to_string())
}
