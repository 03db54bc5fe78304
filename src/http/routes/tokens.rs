//! refresh token 兑换路由
//!
//! 路由：POST /api/tokens/use-refresh

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::http::routes::bearer_from_headers;
use crate::http::HttpServerState;

/// 创建 token 路由
pub fn create_route() -> Router<HttpServerState> {
    Router::new().route("/api/tokens/use-refresh", post(use_refresh))
}

/// refresh token 兑换处理器
///
/// Authorization: Bearer 携带 refresh token，成功返回重签后的
/// 新 token 串。始终 200：失败时 token 为 null，不泄露失败原因。
async fn use_refresh(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
) -> Json<Value> {
    let fingerprint = Fingerprint::from_headers(&headers);
    let service = state.token_service(fingerprint);

    let token = match bearer_from_headers(&headers) {
        Some(refresh) => match service.use_refresh(&refresh).await {
            Ok(new_token) => Some(new_token),
            Err(err) => {
                debug!("refresh 兑换失败: {}", err);
                None
            }
        },
        None => None,
    };

    Json(json!({ "token": token }))
}
