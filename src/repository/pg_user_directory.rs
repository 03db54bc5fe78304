use crate::auth::login_service::UserDirectory;
use crate::auth::models::Identity;
use crate::error::AuthError;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

/// 内置账号系统的用户目录（use_internal_auth = true 时使用）
///
/// 外部账号系统集成时，宿主应用提供自己的 UserDirectory 实现。
pub struct PgUserDirectory {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    password_hash: String,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash \
             FROM jwtgate_users WHERE username = $1 OR email = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!("查询用户失败: {}", e);
            AuthError::InvalidCredentials
        })?;

        let Some(row) = row else {
            return Err(AuthError::InvalidCredentials);
        };

        let ok = bcrypt::verify(password, &row.password_hash).unwrap_or(false);
        if !ok {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(Identity {
            id: row.id,
            username: row.username,
            email: row.email,
        })
    }

    async fn find_by_id(&self, user_id: i64) -> Option<Identity> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash FROM jwtgate_users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .ok()??;

        Some(Identity {
            id: row.id,
            username: row.username,
            email: row.email,
        })
    }
}
