#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chore_sync::connectivity::Connectivity;
use chore_sync::db;
use chore_sync::error::RemoteError;
use chore_sync::models::{SyncState, Task, TaskDraft};
use chore_sync::remote::{AuthSession, Credentials, ListQuery, Registration, RemoteClient, TaskPage};
use chore_sync::services::SyncEngine;
use sqlx::SqlitePool;

#[derive(Default)]
struct FakeState {
    tasks: BTreeMap<i64, Task>,
    next_id: i64,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
    calls: Vec<String>,
    hide_total: bool,
}

/// In-memory stand-in for the task service with scripted failures.
pub struct FakeRemote {
    state: Mutex<FakeState>,
    delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Self::starting_at(1)
    }

    /// Server ids are handed out from `next_id` upwards.
    pub fn starting_at(next_id: i64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                next_id,
                ..FakeState::default()
            }),
            delay: Mutex::new(None),
        })
    }

    pub fn seed(&self, id: i64, title: &str) -> Task {
        let task = server_task(id, title);
        self.state.lock().unwrap().tasks.insert(id, task.clone());
        task
    }

    pub fn remove(&self, id: i64) {
        self.state.lock().unwrap().tasks.remove(&id);
    }

    pub fn task(&self, id: i64) -> Option<Task> {
        self.state.lock().unwrap().tasks.get(&id).cloned()
    }

    pub fn titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .tasks
            .values()
            .map(|t| t.title.clone())
            .collect();
        titles.sort();
        titles
    }

    /// The next call to `op` fails with `err` instead of touching state.
    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// List pages stop reporting `total`, like servers that only paginate.
    pub fn hide_total(&self) {
        self.state.lock().unwrap().hide_total = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn begin(&self, op: &'static str, call: String) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failures.get_mut(op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn not_found(id: i64) -> RemoteError {
    RemoteError::Rejected {
        status: 404,
        message: format!("chore {} not found", id),
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn login(&self, _credentials: &Credentials) -> Result<AuthSession, RemoteError> {
        Err(RemoteError::Rejected {
            status: 401,
            message: "not supported".to_string(),
        })
    }

    async fn register(&self, _registration: &Registration) -> Result<AuthSession, RemoteError> {
        Err(RemoteError::Rejected {
            status: 401,
            message: "not supported".to_string(),
        })
    }

    async fn list(&self, query: &ListQuery) -> Result<TaskPage, RemoteError> {
        self.pause().await;
        self.begin("list", format!("list:{}", query.page))?;
        let state = self.state.lock().unwrap();
        let skip = (query.page.saturating_sub(1) * query.limit) as usize;
        let items: Vec<Task> = state
            .tasks
            .values()
            .skip(skip)
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(TaskPage {
            items,
            total: (!state.hide_total).then_some(state.tasks.len() as u64),
        })
    }

    async fn get(&self, id: i64) -> Result<Task, RemoteError> {
        self.begin("get", format!("get:{}", id))?;
        self.task(id).ok_or_else(|| not_found(id))
    }

    async fn create(&self, draft: &TaskDraft) -> Result<Task, RemoteError> {
        self.pause().await;
        self.begin("create", format!("create:{}", draft.title))?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let mut task = draft.clone().into_task(id, SyncState::Synced);
        task.created_at = Some(format!("2025-01-01T00:00:{:02}Z", id % 60));
        task.owner_id = Some(1);
        state.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn update(&self, id: i64, draft: &TaskDraft) -> Result<Task, RemoteError> {
        self.pause().await;
        self.begin("update", format!("update:{}", id))?;
        let mut state = self.state.lock().unwrap();
        let task = state.tasks.get_mut(&id).ok_or_else(|| not_found(id))?;
        task.apply_draft(draft);
        Ok(task.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), RemoteError> {
        self.pause().await;
        self.begin("delete", format!("delete:{}", id))?;
        let mut state = self.state.lock().unwrap();
        state.tasks.remove(&id).map(|_| ()).ok_or_else(|| not_found(id))
    }
}

pub fn server_task(id: i64, title: &str) -> Task {
    let mut task = TaskDraft::new(title).into_task(id, SyncState::Synced);
    task.created_at = Some(format!("2025-01-01T00:00:{:02}Z", id % 60));
    task.owner_id = Some(1);
    task
}

pub fn draft(title: &str) -> TaskDraft {
    TaskDraft::new(title)
}

pub async fn engine(remote: Arc<FakeRemote>, online: bool) -> (Arc<SyncEngine>, Connectivity) {
    let pool = db::connect_in_memory()
        .await
        .expect("Failed to create database");
    engine_on(pool, remote, online).await
}

pub async fn engine_on(
    pool: SqlitePool,
    remote: Arc<FakeRemote>,
    online: bool,
) -> (Arc<SyncEngine>, Connectivity) {
    let connectivity = Connectivity::new(online);
    let engine = SyncEngine::new(pool, remote, connectivity.clone())
        .await
        .expect("Failed to build engine");
    (Arc::new(engine), connectivity)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
