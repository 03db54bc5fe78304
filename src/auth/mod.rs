// 认证模块 - token 签发、校验、轮换与登录编排

pub mod jwt_codec;
pub mod login_service;
pub mod models;
pub mod token_service;

// 重新导出主要类型
pub use jwt_codec::JwtCodec;
pub use login_service::{LoginService, SessionManager, UserDirectory};
pub use models::{Claims, Credentials, Identity, LoginAttempt, Token, TokenType};
pub use token_service::TokenService;
