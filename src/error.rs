use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token 生命周期错误
///
/// 所有校验/持久化方法显式返回 Result，错误值即失败原因。
/// Display 文案同时作为面向用户的错误消息（登录失败时作为 401 响应体返回）。
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TokenError {
    /// 找不到对应的 token 记录
    #[error("The JWT could not be found.")]
    NotFound,
    /// 记录类型与期望类型不一致
    #[error("The JWT has an incorrect type.")]
    TypeMismatch,
    /// Login token 与当前设备指纹不匹配
    #[error("The JWT is not bound to this device.")]
    DeviceMismatch,
    /// 签名过期
    #[error("The JWT is expired.")]
    Expired,
    /// 签名或结构非法（与过期是两个独立的概念）
    #[error("The JWT signature could not be verified.")]
    MalformedSignature,
    /// 解码成功但 data 声明为空
    #[error("The JWT has no data available.")]
    NoData,
    /// 存储层拒绝写入
    #[error("Could not save JWT: {0}")]
    Persistence(String),
    /// 内部错误（签发失败等）
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for TokenError {
    fn from(err: sqlx::Error) -> Self {
        TokenError::Persistence(err.to_string())
    }
}

/// 认证失败代码
///
/// 外部账号系统（UserDirectory）返回的失败原因，
/// Display 文案即登录接口回传的用户可见消息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AuthError {
    #[error("Account has not been activated.")]
    PendingVerification,
    #[error("Account locked.")]
    Locked,
    #[error("Account locked.")]
    Cooldown,
    #[error("You need to reset your password, but an error was encountered when sending the password reset email.")]
    PasswordResetRequired,
    #[error("Account suspended.")]
    Suspended,
    #[error("You cannot access the CP with that account.")]
    NoCpAccess,
    #[error("You cannot access the site while the system is offline with that account.")]
    NoOfflineAccess,
    #[error("Invalid username or password.")]
    InvalidCredentials,
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, TokenError>;
