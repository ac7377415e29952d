use std::sync::Arc;

use futures_util::Stream;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::watch;

use crate::error::AppError;
use crate::models::{SyncState, Task};

const SELECT_TASKS: &str = r#"
    SELECT
        id, title, description, status, priority, due_date, points,
        created_at, updated_at, owner_id, latitude, longitude,
        location_name, photo_url, sync_state
    FROM tasks
"#;

pub type TaskSnapshot = Arc<Vec<Task>>;

/// Durable cache of tasks keyed by id.
///
/// Every write republishes the full ordered list to subscribers.
pub struct LocalStore {
    db: SqlitePool,
    snapshots: watch::Sender<TaskSnapshot>,
}

impl LocalStore {
    pub async fn open(db: SqlitePool) -> Result<Self, AppError> {
        let tasks = fetch_all(&db).await?;
        let (snapshots, _) = watch::channel(Arc::new(tasks));
        Ok(Self { db, snapshots })
    }

    /// Insert or replace by id.
    pub async fn put(&self, task: &Task) -> Result<(), AppError> {
        let mut conn = self.db.acquire().await?;
        upsert(&mut conn, task).await?;
        drop(conn);
        self.publish().await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Task>, AppError> {
        let task = sqlx::query_as::<_, Task>(&format!("{SELECT_TASKS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(task)
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, AppError> {
        let mut conn = self.db.acquire().await?;
        let removed = remove(&mut conn, id).await?;
        drop(conn);

        if removed {
            self.publish().await?;
        }
        Ok(removed)
    }

    pub async fn set_sync_state(&self, id: i64, state: SyncState) -> Result<bool, AppError> {
        let mut conn = self.db.acquire().await?;
        let changed = mark(&mut conn, id, state).await?;
        drop(conn);

        if changed {
            self.publish().await?;
        }
        Ok(changed)
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<Task>, AppError> {
        fetch_all(&self.db).await
    }

    /// Smallest id present, used to seed provisional ids below anything persisted.
    pub async fn min_id(&self) -> Result<Option<i64>, AppError> {
        let min = sqlx::query_scalar::<_, Option<i64>>("SELECT MIN(id) FROM tasks")
            .fetch_one(&self.db)
            .await?;
        Ok(min)
    }

    /// Receive the current list, then a fresh snapshot after every change.
    pub fn subscribe(&self) -> TaskSubscription {
        TaskSubscription {
            rx: self.snapshots.subscribe(),
            primed: false,
        }
    }

    /// Reload the table and push it to subscribers. Call after committing a
    /// transaction that used the connection-level writers below.
    pub async fn publish(&self) -> Result<(), AppError> {
        let tasks = fetch_all(&self.db).await?;
        self.snapshots.send_replace(Arc::new(tasks));
        Ok(())
    }
}

/// Insert or replace `task` on an open connection or transaction.
pub async fn upsert(conn: &mut SqliteConnection, task: &Task) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO tasks
            (id, title, description, status, priority, due_date, points,
            created_at, updated_at, owner_id, latitude, longitude,
            location_name, photo_url, sync_state)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(task.id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status)
    .bind(task.priority)
    .bind(&task.due_date)
    .bind(task.points)
    .bind(&task.created_at)
    .bind(&task.updated_at)
    .bind(task.owner_id)
    .bind(task.latitude)
    .bind(task.longitude)
    .bind(&task.location_name)
    .bind(&task.photo_url)
    .bind(task.sync_state)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn remove(conn: &mut SqliteConnection, id: i64) -> Result<bool, AppError> {
    let removed = sqlx::query("DELETE FROM tasks WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(removed > 0)
}

pub async fn mark(conn: &mut SqliteConnection, id: i64, state: SyncState) -> Result<bool, AppError> {
    let changed = sqlx::query("UPDATE tasks SET sync_state = ?1 WHERE id = ?2")
        .bind(state)
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(changed > 0)
}

async fn fetch_all(db: &SqlitePool) -> Result<Vec<Task>, AppError> {
    let tasks = sqlx::query_as::<_, Task>(&format!(
        "{SELECT_TASKS} ORDER BY created_at DESC, id DESC"
    ))
    .fetch_all(db)
    .await?;
    Ok(tasks)
}

/// Handle on the task list stream. Dropping it unsubscribes.
pub struct TaskSubscription {
    rx: watch::Receiver<TaskSnapshot>,
    primed: bool,
}

impl TaskSubscription {
    /// Next snapshot; the first call yields the current state immediately.
    ///
    /// Intermediate snapshots may be skipped when the consumer is slow.
    /// Returns `None` once the store has been dropped.
    pub async fn next(&mut self) -> Option<TaskSnapshot> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }

        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}

    pub fn into_stream(self) -> impl Stream<Item = TaskSnapshot> {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|snapshot| (snapshot, sub))
        })
    }
}
