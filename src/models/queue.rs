use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;
use crate::models::TaskDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

/// A mutation waiting for remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct QueueEntry {
    pub seq: i64,
    pub op: OpKind,
    pub target_id: i64,
    pub payload: Option<String>,
    pub enqueued_at: String,
}

impl QueueEntry {
    /// Decode the task snapshot stored with a create or update.
    pub fn draft(&self) -> Result<TaskDraft, AppError> {
        let payload = self.payload.as_deref().ok_or_else(|| {
            AppError::BadRequest(format!("queue entry {} has no payload", self.seq))
        })?;
        Ok(serde_json::from_str(payload)?)
    }
}
