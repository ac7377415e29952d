use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::models::Task;

/// Response body shared by every task endpoint.
///
/// Older servers use `chores`/`chore`, newer ones `items`/`item`.
#[derive(Debug, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub items: Option<Vec<Task>>,
    #[serde(default)]
    pub chores: Option<Vec<Task>>,
    #[serde(default)]
    pub item: Option<Task>,
    #[serde(default)]
    pub chore: Option<Task>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Envelope {
    pub fn into_task(self) -> Result<Task, RemoteError> {
        self.item
            .or(self.chore)
            .ok_or(RemoteError::MissingPayload("chore"))
    }

    pub fn into_page(self) -> TaskPage {
        let items = self.items.or(self.chores).unwrap_or_default();
        TaskPage {
            items,
            total: self.total,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPage {
    pub items: Vec<Task>,
    /// Absent when the server does not report it; only a short page ends paging then.
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub status: Option<crate::models::TaskStatus>,
    pub query: Option<String>,
}

impl ListQuery {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            status: None,
            query: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
