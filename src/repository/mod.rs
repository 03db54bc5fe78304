use crate::auth::models::{Token, TokenType};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory_token_repo;
pub mod pg_token_repo;
pub mod pg_user_directory;

pub use memory_token_repo::MemoryTokenRepository;
pub use pg_token_repo::PgTokenRepository;
pub use pg_user_directory::PgUserDirectory;

/// Token 查询过滤器：对字段做精确匹配
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenFilter {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub related_id: Option<i64>,
    pub token_type: Option<TokenType>,
    pub token: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
}

impl TokenFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn related_id(mut self, related_id: i64) -> Self {
        self.related_id = Some(related_id);
        self
    }

    pub fn token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = Some(token_type);
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = Some(browser.into());
        self
    }

    /// 行是否匹配所有已设置的条件
    pub fn matches(&self, row: &Token) -> bool {
        if let Some(id) = self.id {
            if row.id != id {
                return false;
            }
        }
        if let Some(user_id) = self.user_id {
            if row.user_id != Some(user_id) {
                return false;
            }
        }
        if let Some(related_id) = self.related_id {
            if row.related_id != Some(related_id) {
                return false;
            }
        }
        if let Some(token_type) = self.token_type {
            if row.token_type != token_type {
                return false;
            }
        }
        if let Some(token) = &self.token {
            if &row.token != token {
                return false;
            }
        }
        if let Some(device) = &self.device {
            if &row.device != device {
                return false;
            }
        }
        if let Some(browser) = &self.browser {
            if &row.browser != browser {
                return false;
            }
        }
        true
    }
}

/// Token 存储
///
/// 两个实现：内存版（测试、独立部署）和 PostgreSQL 版。
/// 列表查询按创建顺序倒序返回（最新在前）。
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// 查找单条记录
    async fn find(&self, filter: &TokenFilter) -> Result<Option<Token>>;

    /// 查找所有匹配记录，创建顺序倒序
    async fn find_all(&self, filter: &TokenFilter) -> Result<Vec<Token>>;

    /// 根据主键查找
    async fn find_by_id(&self, id: i64) -> Result<Option<Token>>;

    /// 插入新记录，分配 ID 并返回完整记录
    async fn insert(&self, token: &Token) -> Result<Token>;

    /// 原子替换：删除所有匹配行后插入新记录（单事务）
    ///
    /// 这是签发路径的"同元组至多一条"保证：并发签发不会留下重复行。
    async fn replace(&self, filter: &TokenFilter, token: &Token) -> Result<Token>;

    /// 更新记录（乐观并发：CAS date_updated）
    ///
    /// 返回 false 表示记录不存在，或 date_updated 已被并发修改。
    async fn update(&self, token: &Token, expected_updated: DateTime<Utc>) -> Result<bool>;

    /// 按过滤器批量删除，返回直接删除的行数
    ///
    /// 级联：删除任意一端会连带删除与其关联的另一端
    /// （refresh 行与被其刷新的行互为级联）。
    async fn delete_by(&self, filter: &TokenFilter) -> Result<u64>;
}
