//! Contributor directory: links commit authors to chat users.
use crate::db;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

#[async_trait]
pub trait ContributorDirectory: Send + Sync {
    /// Chat user linked to a commit author, if any.
    async fn chat_user_for(&self, author: &str) -> Result<Option<i64>>;

    /// Every known contributor name.
    async fn names(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct SqliteContributors {
    pool: SqlitePool,
}

impl SqliteContributors {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContributorDirectory for SqliteContributors {
    async fn chat_user_for(&self, author: &str) -> Result<Option<i64>> {
        Ok(db::get_contributor(&self.pool, author)
            .await?
            .and_then(|c| c.chat_user_id))
    }

    async fn names(&self) -> Result<Vec<String>> {
        db::contributor_logins(&self.pool).await
    }
}
