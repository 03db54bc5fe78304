use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fingerprint::Fingerprint;

/// Token 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// 登录 token，绑定签发时的设备和浏览器
    #[serde(rename = "login")]
    Login,
    /// 一次性登录 token，可跨设备兑换（例如邮件链接）
    #[serde(rename = "oneTimeLogin")]
    OneTimeLogin,
    /// 刷新 token，只用于重签关联的 token
    #[serde(rename = "refresh")]
    Refresh,
}

impl TokenType {
    /// 持久化时使用的类型名
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Login => "login",
            TokenType::OneTimeLogin => "oneTimeLogin",
            TokenType::Refresh => "refresh",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "login" => Some(TokenType::Login),
            "oneTimeLogin" => Some(TokenType::OneTimeLogin),
            "refresh" => Some(TokenType::Refresh),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token 记录（唯一实体）
///
/// 业务逻辑只接触这个类型，存储细节由 TokenRepository 负责。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// 持久化时分配的 ID
    pub id: i64,
    /// 所属用户（部分用途的 token 没有用户）
    pub user_id: Option<i64>,
    /// Refresh token 指向被其刷新的 token
    pub related_id: Option<i64>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// 应用自定义负载，嵌入签名声明的 data 字段
    pub contents: Map<String, Value>,
    /// 签发时的设备类型
    pub device: String,
    /// 签发时的浏览器类型
    pub browser: String,
    /// 签发时的 User-Agent
    pub user_agent: String,
    /// 当前签名串；轮换原地改写这个字段，不改 ID
    pub token: String,
    /// 使用次数
    pub times_used: i32,
    pub date_used: Option<DateTime<Utc>>,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

impl Token {
    /// 构造一条尚未持久化的记录（ID 由存储层分配）
    pub fn new(
        token_type: TokenType,
        contents: Map<String, Value>,
        user_id: Option<i64>,
        fingerprint: &Fingerprint,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            related_id: None,
            token_type,
            contents,
            device: fingerprint.device.clone(),
            browser: fingerprint.browser.clone(),
            user_agent: fingerprint.user_agent.clone(),
            token: String::new(),
            times_used: 0,
            date_used: None,
            date_created: now,
            date_updated: now,
        }
    }
}

/// JWT 声明（紧凑 JWT，HS256）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// 签发者（站点 URL）
    pub iss: String,
    /// 签发时间 (Unix timestamp)
    pub iat: i64,
    /// 过期时间 (Unix timestamp)
    pub exp: i64,
    /// 应用负载
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// 外部账号系统里的身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// 登录凭证
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// 一次认证尝试携带的信息
#[derive(Debug, Clone, Default)]
pub struct LoginAttempt {
    /// 请求体中的用户名/密码
    pub credentials: Option<Credentials>,
    /// Authorization: Bearer 头中的 token
    pub bearer: Option<String>,
}
