use crate::auth::models::{Token, TokenType};
use crate::error::Result;
use crate::repository::{TokenFilter, TokenRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::debug;

/// 内存 Token 存储
///
/// 测试和独立部署时使用，语义与 PostgreSQL 实现一致：
/// 同一把写锁内完成替换/级联，倒序列表，CAS 更新。
pub struct MemoryTokenRepository {
    inner: RwLock<Inner>,
}

struct Inner {
    rows: Vec<Token>,
    next_id: i64,
}

impl MemoryTokenRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                rows: Vec::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for MemoryTokenRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn insert_row(&mut self, token: &Token) -> Token {
        let mut stored = token.clone();
        stored.id = self.next_id;
        self.next_id += 1;
        self.rows.push(stored.clone());
        stored
    }

    /// 删除匹配行及其级联闭包，返回直接删除的行数
    fn delete_matching(&mut self, filter: &TokenFilter) -> u64 {
        let direct: Vec<Token> = self
            .rows
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        let count = direct.len() as u64;

        let mut doomed: HashSet<i64> = direct.iter().map(|row| row.id).collect();

        // 级联闭包：refresh 行与其关联行互为级联
        loop {
            let mut grew = false;
            for row in &self.rows {
                if doomed.contains(&row.id) {
                    continue;
                }
                // 关联行已被删除（父被删 -> 子跟着删）
                let child_of_doomed = row
                    .related_id
                    .map(|rid| doomed.contains(&rid))
                    .unwrap_or(false);
                // refresh 子行被删 -> 其指向的父行跟着删
                let parent_of_doomed = self
                    .rows
                    .iter()
                    .any(|other| {
                        other.token_type == TokenType::Refresh
                            && doomed.contains(&other.id)
                            && other.related_id == Some(row.id)
                    });

                if child_of_doomed || parent_of_doomed {
                    doomed.insert(row.id);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        self.rows.retain(|row| !doomed.contains(&row.id));
        count
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn find(&self, filter: &TokenFilter) -> Result<Option<Token>> {
        let inner = self.inner.read().await;
        let mut matches: Vec<&Token> = inner.rows.iter().filter(|r| filter.matches(r)).collect();
        matches.sort_by_key(|r| std::cmp::Reverse(r.id));
        Ok(matches.first().map(|r| (*r).clone()))
    }

    async fn find_all(&self, filter: &TokenFilter) -> Result<Vec<Token>> {
        let inner = self.inner.read().await;
        let mut matches: Vec<Token> = inner
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matches.sort_by_key(|r| std::cmp::Reverse(r.id));
        Ok(matches)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Token>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.iter().find(|r| r.id == id).cloned())
    }

    async fn insert(&self, token: &Token) -> Result<Token> {
        let mut inner = self.inner.write().await;
        let stored = inner.insert_row(token);
        debug!("token 已保存: id={}, type={}", stored.id, stored.token_type);
        Ok(stored)
    }

    async fn replace(&self, filter: &TokenFilter, token: &Token) -> Result<Token> {
        // 同一把写锁内删除加插入，对并发签发等价于一个事务
        let mut inner = self.inner.write().await;
        let removed = inner.delete_matching(filter);
        if removed > 0 {
            debug!("替换签发：已移除 {} 条同元组旧 token", removed);
        }
        Ok(inner.insert_row(token))
    }

    async fn update(&self, token: &Token, expected_updated: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(row) = inner.rows.iter_mut().find(|r| r.id == token.id) else {
            return Ok(false);
        };
        if row.date_updated != expected_updated {
            // 并发写冲突
            return Ok(false);
        }
        *row = token.clone();
        Ok(true)
    }

    async fn delete_by(&self, filter: &TokenFilter) -> Result<u64> {
        let mut inner = self.inner.write().await;
        Ok(inner.delete_matching(filter))
    }
}
