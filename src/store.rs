//! Store collaborator used by the pipeline and the reconciliation loop.
use crate::db::{self, Pool};
use crate::model::{DesiredTime, Reading, Subject};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Store: Send + Sync {
    /// Every subject that wants a daily notification, ordered by subject id.
    async fn list_subject_desired_times(&self) -> Result<Vec<DesiredTime>>;

    async fn get_subject_by_contact(&self, contact: &str) -> Result<Option<Subject>>;

    /// Newest first.
    async fn get_recent_readings(&self, subject_id: i64, limit: i64) -> Result<Vec<Reading>>;

    async fn append_conversation_record(
        &self,
        subject_id: i64,
        prompt_label: &str,
        text: &str,
        follow_up: bool,
    ) -> Result<()>;
}

/// [`Store`] backed by the SQLite repositories in [`crate::db`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_subject_desired_times(&self) -> Result<Vec<DesiredTime>> {
        db::list_desired_times(&self.pool).await
    }

    async fn get_subject_by_contact(&self, contact: &str) -> Result<Option<Subject>> {
        db::find_subject_by_phone(&self.pool, contact).await
    }

    async fn get_recent_readings(&self, subject_id: i64, limit: i64) -> Result<Vec<Reading>> {
        db::recent_readings(&self.pool, subject_id, limit).await
    }

    async fn append_conversation_record(
        &self,
        subject_id: i64,
        prompt_label: &str,
        text: &str,
        follow_up: bool,
    ) -> Result<()> {
        db::insert_conversation(&self.pool, subject_id, prompt_label, text, follow_up).await?;
        Ok(())
    }
}
