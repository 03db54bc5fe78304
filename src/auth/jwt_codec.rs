use crate::auth::models::Claims;
use crate::error::{Result, TokenError};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};

/// JWT 签名与验证 (HS256 对称加密)
///
/// 纯函数式组件：不持有任何可变状态，密钥在进程启动时派生一次。
pub struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtCodec {
    pub fn new(secret: &str, issuer: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
        }
    }

    /// 签发 token：声明为 {iss, iat, exp, data}
    pub fn sign(&self, contents: &Map<String, Value>, ttl_secs: i64) -> Result<String> {
        let now = Utc::now().timestamp();

        let claims = Claims {
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl_secs,
            data: contents.clone(),
        };

        let header = Header::new(Algorithm::HS256);
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| TokenError::Internal(format!("JWT 签发失败: {}", e)))
    }

    /// 验证 token 并返回声明
    ///
    /// 过期映射为 `Expired`，其余一切解码失败（签名、结构、编码）
    /// 映射为 `MalformedSignature` —— 过期与签名错误是两个独立的概念。
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::MalformedSignature,
            })
    }
}
