use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::connectivity::Connectivity;
use crate::db::{LocalStore, OperationQueue, TaskSubscription, queue, store};
use crate::error::{AppError, RemoteError};
use crate::models::{OpKind, QueueEntry, SyncState, Task, TaskDraft};
use crate::notifier::ChangeEvent;
use crate::remote::{ListQuery, RemoteClient};

const REFRESH_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Syncing,
}

/// What asked for a reconciliation pass. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Connectivity,
    Foreground,
    Periodic,
    Manual,
    Shake,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "applied", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// This call ran the pass.
    Completed(usize),
    /// Another pass was already running; this call waited for it.
    Joined(usize),
    /// Offline, nothing attempted.
    Skipped,
}

impl SyncOutcome {
    pub fn applied(self) -> usize {
        match self {
            SyncOutcome::Completed(n) | SyncOutcome::Joined(n) => n,
            SyncOutcome::Skipped => 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    pub pulled: usize,
    pub skipped: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PassState {
    pub state: EngineState,
    pub completed: u64,
    pub last_applied: usize,
}

/// Resets the engine to idle even if the pass bails out early.
struct PassGuard<'a> {
    tx: &'a watch::Sender<PassState>,
    applied: usize,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let applied = self.applied;
        self.tx.send_modify(|pass| {
            pass.state = EngineState::Idle;
            pass.completed += 1;
            pass.last_applied = applied;
        });
    }
}

/// Owns the local cache and the pending queue, and reconciles both against
/// the remote service.
///
/// Every write path (direct mutations, replay passes and refresh) runs under
/// one writer lock, so an optimistic write never interleaves with a pass.
/// A task write and its queue write always commit in the same transaction.
pub struct SyncEngine {
    db: SqlitePool,
    store: LocalStore,
    queue: OperationQueue,
    remote: Arc<dyn RemoteClient>,
    connectivity: Connectivity,
    next_provisional: AtomicI64,
    writer: Mutex<()>,
    pass: watch::Sender<PassState>,
}

impl SyncEngine {
    pub async fn new(
        db: SqlitePool,
        remote: Arc<dyn RemoteClient>,
        connectivity: Connectivity,
    ) -> Result<Self, AppError> {
        let store = LocalStore::open(db.clone()).await?;
        let queue = OperationQueue::new(db.clone());

        let floor = [store.min_id().await?, queue.min_target().await?]
            .into_iter()
            .flatten()
            .fold(0, i64::min);

        let (pass, _) = watch::channel(PassState {
            state: EngineState::Idle,
            completed: 0,
            last_applied: 0,
        });

        Ok(Self {
            db,
            store,
            queue,
            remote,
            connectivity,
            next_provisional: AtomicI64::new(floor - 1),
            writer: Mutex::new(()),
            pass,
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn subscribe_tasks(&self) -> TaskSubscription {
        self.store.subscribe()
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn state(&self) -> EngineState {
        self.pass.borrow().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PassState> {
        self.pass.subscribe()
    }

    pub async fn pending_count(&self) -> Result<usize, AppError> {
        self.queue.count().await
    }

    pub async fn pending_entries(&self) -> Result<Vec<QueueEntry>, AppError> {
        self.queue.list_pending().await
    }

    fn allocate_provisional_id(&self) -> i64 {
        self.next_provisional.fetch_sub(1, Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        Ok(self.db.begin().await?)
    }

    /// Subscribers only see state that made it to disk.
    async fn commit(&self, tx: Transaction<'static, Sqlite>) -> Result<(), AppError> {
        tx.commit().await?;
        self.store.publish().await
    }

    pub async fn create(&self, draft: TaskDraft) -> Result<Task, AppError> {
        let _writer = self.writer.lock().await;

        if self.connectivity.is_currently_online() {
            match self.remote.create(&draft).await {
                Ok(task) => {
                    let task = task.with_sync_state(SyncState::Synced);
                    self.store.put(&task).await?;
                    debug!("created task {} remotely", task.id);
                    return Ok(task);
                }
                Err(e) => warn!("remote create failed, queueing: {}", e),
            }
        }

        let id = self.allocate_provisional_id();
        let now = Utc::now().to_rfc3339();
        let mut task = draft.clone().into_task(id, SyncState::PendingCreate);
        task.created_at = Some(now.clone());
        task.updated_at = Some(now);

        let mut tx = self.begin().await?;
        store::upsert(&mut tx, &task).await?;
        queue::push(&mut tx, OpKind::Create, id, Some(&draft)).await?;
        self.commit(tx).await?;
        info!("queued create for provisional task {}", id);

        Ok(task)
    }

    pub async fn update(&self, id: i64, draft: TaskDraft) -> Result<Task, AppError> {
        let _writer = self.writer.lock().await;

        let existing = self.store.get(id).await?.ok_or(AppError::NotFound)?;
        if existing.sync_state == SyncState::PendingDelete {
            return Err(AppError::Conflict(format!("task {} is pending deletion", id)));
        }

        let live = self.queue.find_for(id).await?;
        if live.is_none() && !existing.is_provisional() && self.connectivity.is_currently_online() {
            match self.remote.update(id, &draft).await {
                Ok(task) => {
                    let task = task.with_sync_state(SyncState::Synced);
                    self.store.put(&task).await?;
                    return Ok(task);
                }
                Err(e) => warn!("remote update of {} failed, queueing: {}", id, e),
            }
        }

        let op = match &live {
            Some(entry) if entry.op == OpKind::Create => OpKind::Create,
            None if existing.is_provisional() => OpKind::Create,
            _ => OpKind::Update,
        };

        let mut task = existing;
        task.apply_draft(&draft);
        task.updated_at = Some(Utc::now().to_rfc3339());
        task.sync_state = match op {
            OpKind::Create => SyncState::PendingCreate,
            _ => SyncState::PendingUpdate,
        };

        let mut tx = self.begin().await?;
        store::upsert(&mut tx, &task).await?;
        match &live {
            Some(entry) => {
                queue::rewrite(&mut tx, entry.seq, op, Some(&draft)).await?;
            }
            None => {
                queue::push(&mut tx, op, id, Some(&draft)).await?;
            }
        }
        self.commit(tx).await?;
        info!("queued {:?} for task {}", op, id);

        Ok(task)
    }

    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        let _writer = self.writer.lock().await;

        let existing = self.store.get(id).await?.ok_or(AppError::NotFound)?;
        if existing.sync_state == SyncState::PendingDelete {
            return Ok(());
        }

        let live = self.queue.find_for(id).await?;
        if live.is_none() && !existing.is_provisional() && self.connectivity.is_currently_online() {
            match self.remote.delete(id).await {
                Ok(()) => {
                    self.store.delete(id).await?;
                    return Ok(());
                }
                Err(e) => warn!("remote delete of {} failed, queueing: {}", id, e),
            }
        }

        if live.is_none() && existing.is_provisional() {
            self.store.delete(id).await?;
            return Ok(());
        }

        let mut tx = self.begin().await?;
        match live {
            Some(entry) if entry.op == OpKind::Create => {
                // Never reached the server, so nothing to tell it.
                queue::drop_entry(&mut tx, entry.seq).await?;
                store::remove(&mut tx, id).await?;
                self.commit(tx).await?;
                info!("dropped unsynced task {}", id);
                return Ok(());
            }
            Some(entry) => {
                queue::rewrite(&mut tx, entry.seq, OpKind::Delete, None).await?;
            }
            None => {
                queue::push(&mut tx, OpKind::Delete, id, None).await?;
            }
        }
        store::mark(&mut tx, id, SyncState::PendingDelete).await?;
        self.commit(tx).await?;
        info!("queued delete for task {}", id);

        Ok(())
    }

    /// Replay the queue against the remote, or join a pass already in flight.
    ///
    /// The pass runs on its own task: dropping the caller that started it
    /// does not stop it, and joiners still get its result.
    pub async fn sync(self: &Arc<Self>, trigger: SyncTrigger) -> Result<SyncOutcome, AppError> {
        if !self.connectivity.is_currently_online() {
            debug!("sync ({:?}) skipped: offline", trigger);
            return Ok(SyncOutcome::Skipped);
        }

        let mut running = None;
        self.pass.send_if_modified(|pass| {
            if pass.state == EngineState::Syncing {
                running = Some(pass.completed);
                return false;
            }
            pass.state = EngineState::Syncing;
            true
        });

        if let Some(seen) = running {
            debug!("sync ({:?}) joining running pass", trigger);
            let mut rx = self.pass.subscribe();
            let pass = rx
                .wait_for(|pass| pass.completed > seen)
                .await
                .map_err(|_| AppError::InternalServerError)?;
            return Ok(SyncOutcome::Joined(pass.last_applied));
        }

        info!("sync pass started ({:?})", trigger);
        let engine = Arc::clone(self);
        let pass = tokio::spawn(async move {
            let mut guard = PassGuard {
                tx: &engine.pass,
                applied: 0,
            };
            let _writer = engine.writer.lock().await;
            let applied = engine.run_pass().await?;
            guard.applied = applied;
            Ok::<_, AppError>(applied)
        });

        let applied = pass.await.map_err(|e| {
            error!("sync pass aborted: {}", e);
            AppError::InternalServerError
        })??;

        Ok(SyncOutcome::Completed(applied))
    }

    async fn run_pass(&self) -> Result<usize, AppError> {
        let entries = self.queue.list_pending().await?;
        let total = entries.len();
        let mut applied = 0;
        let mut kept = 0;

        for entry in entries {
            match self.replay(&entry).await {
                Ok(()) => applied += 1,
                Err(AppError::Remote(e)) if e.is_retryable() => {
                    warn!("{:?} for task {} failed, will retry: {}", entry.op, entry.target_id, e);
                    kept += 1;
                }
                Err(AppError::Remote(e)) => {
                    warn!("{:?} for task {} rejected, dropping: {}", entry.op, entry.target_id, e);
                    self.settle_rejected(&entry).await?;
                }
                Err(e @ (AppError::Serialization(_) | AppError::BadRequest(_))) => {
                    warn!("queue entry {} unreadable, dropping: {}", entry.seq, e);
                    self.settle_rejected(&entry).await?;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "sync pass finished: {} of {} applied, {} kept for retry",
            applied, total, kept
        );
        Ok(applied)
    }

    async fn replay(&self, entry: &QueueEntry) -> Result<(), AppError> {
        match entry.op {
            OpKind::Create => {
                let draft = entry.draft()?;
                let task = self.remote.create(&draft).await?;
                let mut tx = self.begin().await?;
                queue::drop_entry(&mut tx, entry.seq).await?;
                store::remove(&mut tx, entry.target_id).await?;
                store::upsert(&mut tx, &task.clone().with_sync_state(SyncState::Synced)).await?;
                self.commit(tx).await?;
                debug!("provisional task {} is now {}", entry.target_id, task.id);
            }
            OpKind::Update => {
                let draft = entry.draft()?;
                let task = self.remote.update(entry.target_id, &draft).await?;
                let mut tx = self.begin().await?;
                store::upsert(&mut tx, &task.with_sync_state(SyncState::Synced)).await?;
                queue::drop_entry(&mut tx, entry.seq).await?;
                self.commit(tx).await?;
            }
            OpKind::Delete => {
                self.remote.delete(entry.target_id).await?;
                let mut tx = self.begin().await?;
                store::remove(&mut tx, entry.target_id).await?;
                queue::drop_entry(&mut tx, entry.seq).await?;
                self.commit(tx).await?;
            }
        }
        Ok(())
    }

    /// Drop a definitively failed entry and bring its task back in line with the server.
    async fn settle_rejected(&self, entry: &QueueEntry) -> Result<(), AppError> {
        let server = match entry.op {
            OpKind::Create => None,
            _ => Some(self.remote.get(entry.target_id).await),
        };

        let mut tx = self.begin().await?;
        queue::drop_entry(&mut tx, entry.seq).await?;
        match server {
            None | Some(Err(RemoteError::Rejected { status: 404 | 410, .. })) => {
                store::remove(&mut tx, entry.target_id).await?;
            }
            Some(Ok(task)) => {
                store::upsert(&mut tx, &task.with_sync_state(SyncState::Synced)).await?;
            }
            Some(Err(e)) => {
                warn!("could not re-read task {}, keeping local copy: {}", entry.target_id, e);
                store::mark(&mut tx, entry.target_id, SyncState::Synced).await?;
            }
        }
        self.commit(tx).await
    }

    /// Pull every server task into the cache. Tasks with queued work keep their local version.
    pub async fn refresh(&self) -> Result<RefreshStats, AppError> {
        if !self.connectivity.is_currently_online() {
            debug!("refresh skipped: offline");
            return Ok(RefreshStats::default());
        }

        let _writer = self.writer.lock().await;

        let server_tasks = self.fetch_all_remote().await?;
        let pending = self.queue.pending_targets().await?;
        let server_ids: HashSet<i64> = server_tasks.iter().map(|t| t.id).collect();

        let mut stats = RefreshStats::default();
        for task in server_tasks {
            if pending.contains(&task.id) {
                stats.skipped += 1;
                continue;
            }
            self.store.put(&task.with_sync_state(SyncState::Synced)).await?;
            stats.pulled += 1;
        }

        for task in self.store.list().await? {
            let stale = task.sync_state == SyncState::Synced
                && !task.is_provisional()
                && !server_ids.contains(&task.id)
                && !pending.contains(&task.id);
            if stale && self.store.delete(task.id).await? {
                stats.removed += 1;
            }
        }

        info!(
            "refresh: pulled {}, skipped {} (local pending), removed {}",
            stats.pulled, stats.skipped, stats.removed
        );
        Ok(stats)
    }

    async fn fetch_all_remote(&self) -> Result<Vec<Task>, AppError> {
        let mut tasks = Vec::new();
        let mut page = 1;

        loop {
            let result = self
                .remote
                .list(&ListQuery::page(page, REFRESH_PAGE_SIZE))
                .await?;
            let fetched = result.items.len();
            tasks.extend(result.items);

            let short = fetched < REFRESH_PAGE_SIZE as usize;
            let reached = result.total.is_some_and(|total| tasks.len() as u64 >= total);
            if short || reached {
                break;
            }
            page += 1;
        }

        Ok(tasks)
    }

    /// Replay the queue, then pull server state.
    pub async fn sync_and_refresh(
        self: &Arc<Self>,
        trigger: SyncTrigger,
    ) -> Result<(SyncOutcome, RefreshStats), AppError> {
        let outcome = self.sync(trigger).await?;
        let stats = self.refresh().await?;
        Ok((outcome, stats))
    }

    pub async fn handle_change(self: &Arc<Self>, event: &ChangeEvent) -> Result<(), AppError> {
        debug!("push event for task {}", event.task_id());
        self.sync_and_refresh(SyncTrigger::Push).await?;
        Ok(())
    }
}
