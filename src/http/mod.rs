//! HTTP 服务器模块 - 使用 Axum 提供认证 API
//!
//! 功能包括：
//! - 登录接口（凭证 / token / 一次性登录 token）
//! - 登出接口
//! - refresh token 兑换接口

pub mod routes;
pub mod server;

pub use server::{AuthHttpServer, HttpServerState};
