use crate::auth::models::{Token, TokenType};
use crate::error::{Result, TokenError};
use crate::repository::{TokenFilter, TokenRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

const COLUMNS: &str = "id, user_id, related_id, type, contents, device, browser, \
     user_agent, token, times_used, date_used, date_created, date_updated";

/// PostgreSQL Token 存储
pub struct PgTokenRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct Row {
    id: i64,
    user_id: Option<i64>,
    related_id: Option<i64>,
    #[sqlx(rename = "type")]
    token_type: String,
    contents: serde_json::Value,
    device: String,
    browser: String,
    user_agent: String,
    token: String,
    times_used: i32,
    date_used: Option<DateTime<Utc>>,
    date_created: DateTime<Utc>,
    date_updated: DateTime<Utc>,
}

impl Row {
    fn into_token(self) -> Result<Token> {
        let token_type = TokenType::from_str(&self.token_type)
            .ok_or_else(|| TokenError::Persistence(format!("未知 token 类型: {}", self.token_type)))?;
        let contents = match self.contents {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        Ok(Token {
            id: self.id,
            user_id: self.user_id,
            related_id: self.related_id,
            token_type,
            contents,
            device: self.device,
            browser: self.browser,
            user_agent: self.user_agent,
            token: self.token,
            times_used: self.times_used,
            date_used: self.date_used,
            date_created: self.date_created,
            date_updated: self.date_updated,
        })
    }
}

/// 级联删除用的最小行信息
#[derive(sqlx::FromRow)]
struct DeletedRow {
    id: i64,
    related_id: Option<i64>,
    #[sqlx(rename = "type")]
    token_type: String,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &TokenFilter) {
        qb.push(" WHERE TRUE");
        if let Some(id) = filter.id {
            qb.push(" AND id = ").push_bind(id);
        }
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(related_id) = filter.related_id {
            qb.push(" AND related_id = ").push_bind(related_id);
        }
        if let Some(token_type) = filter.token_type {
            qb.push(" AND type = ").push_bind(token_type.as_str());
        }
        if let Some(token) = &filter.token {
            qb.push(" AND token = ").push_bind(token.clone());
        }
        if let Some(device) = &filter.device {
            qb.push(" AND device = ").push_bind(device.clone());
        }
        if let Some(browser) = &filter.browser {
            qb.push(" AND browser = ").push_bind(browser.clone());
        }
    }

    async fn insert_in<'e, E>(executor: E, token: &Token) -> Result<Token>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, Row>(&format!(
            "INSERT INTO jwtgate_tokens \
                 (user_id, related_id, type, contents, device, browser, user_agent, \
                  token, times_used, date_used, date_created, date_updated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {COLUMNS}"
        ))
        .bind(token.user_id)
        .bind(token.related_id)
        .bind(token.token_type.as_str())
        .bind(serde_json::Value::Object(token.contents.clone()))
        .bind(&token.device)
        .bind(&token.browser)
        .bind(&token.user_agent)
        .bind(&token.token)
        .bind(token.times_used)
        .bind(token.date_used)
        .bind(token.date_created)
        .bind(token.date_updated)
        .fetch_one(executor)
        .await?;

        row.into_token()
    }

    /// 事务内删除匹配行并补全级联闭包，返回直接删除的行数
    ///
    /// 外键 ON DELETE CASCADE 已覆盖"父被删 -> refresh 子跟着删"；
    /// 这里补上反方向："refresh 子被删 -> 其指向的父跟着删"。
    async fn delete_matching_tx(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        filter: &TokenFilter,
    ) -> Result<u64> {
        let mut qb = QueryBuilder::new("DELETE FROM jwtgate_tokens");
        Self::push_filter(&mut qb, filter);
        qb.push(" RETURNING id, related_id, type");

        let mut deleted: Vec<DeletedRow> =
            qb.build_query_as::<DeletedRow>().fetch_all(&mut **tx).await?;
        let count = deleted.len() as u64;

        loop {
            let parent_ids: Vec<i64> = deleted
                .iter()
                .filter(|row| row.token_type == TokenType::Refresh.as_str())
                .filter_map(|row| row.related_id)
                .collect();
            if parent_ids.is_empty() {
                break;
            }

            deleted = sqlx::query_as::<_, DeletedRow>(
                "DELETE FROM jwtgate_tokens WHERE id = ANY($1) RETURNING id, related_id, type",
            )
            .bind(parent_ids)
            .fetch_all(&mut **tx)
            .await?;
        }

        Ok(count)
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn find(&self, filter: &TokenFilter) -> Result<Option<Token>> {
        let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM jwtgate_tokens"));
        Self::push_filter(&mut qb, filter);
        qb.push(" ORDER BY id DESC LIMIT 1");

        let row = qb.build_query_as::<Row>().fetch_optional(&self.pool).await?;
        row.map(Row::into_token).transpose()
    }

    async fn find_all(&self, filter: &TokenFilter) -> Result<Vec<Token>> {
        let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM jwtgate_tokens"));
        Self::push_filter(&mut qb, filter);
        qb.push(" ORDER BY id DESC");

        let rows = qb.build_query_as::<Row>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Row::into_token).collect()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Token>> {
        self.find(&TokenFilter::new().id(id)).await
    }

    async fn insert(&self, token: &Token) -> Result<Token> {
        Self::insert_in(&self.pool, token).await
    }

    async fn replace(&self, filter: &TokenFilter, token: &Token) -> Result<Token> {
        let mut tx = self.pool.begin().await?;

        let removed = Self::delete_matching_tx(&mut tx, filter).await?;
        if removed > 0 {
            debug!("替换签发：已移除 {} 条同元组旧 token", removed);
        }
        let stored = Self::insert_in(&mut *tx, token).await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn update(&self, token: &Token, expected_updated: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jwtgate_tokens SET \
                 user_id = $1, related_id = $2, type = $3, contents = $4, \
                 device = $5, browser = $6, user_agent = $7, token = $8, \
                 times_used = $9, date_used = $10, date_updated = $11 \
             WHERE id = $12 AND date_updated = $13",
        )
        .bind(token.user_id)
        .bind(token.related_id)
        .bind(token.token_type.as_str())
        .bind(serde_json::Value::Object(token.contents.clone()))
        .bind(&token.device)
        .bind(&token.browser)
        .bind(&token.user_agent)
        .bind(&token.token)
        .bind(token.times_used)
        .bind(token.date_used)
        .bind(token.date_updated)
        .bind(token.id)
        .bind(expected_updated)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_by(&self, filter: &TokenFilter) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let count = Self::delete_matching_tx(&mut tx, filter).await?;
        tx.commit().await?;
        Ok(count)
    }
}
