use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::notifier::ChangeSubscription;
use crate::services::sync_engine::{SyncEngine, SyncOutcome, SyncTrigger};

/// Periodic sync trigger.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, interval_secs: u64) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Run forever, one pass per interval. Failures are logged and the loop continues.
    pub async fn start(self) {
        info!("Starting auto-sync scheduler (interval: {:?})", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;
            run_logged(&self.engine, SyncTrigger::Periodic).await;
        }
    }
}

async fn run_logged(engine: &Arc<SyncEngine>, trigger: SyncTrigger) {
    match engine.sync(trigger).await {
        Ok(SyncOutcome::Skipped) => {}
        Ok(outcome) => info!("{:?} sync applied {} operations", trigger, outcome.applied()),
        Err(e) => warn!("{:?} sync failed: {:?}", trigger, e),
    }
}

/// Owns the background tasks that start sync passes.
///
/// Dropping the handle (or calling [`SyncTriggers::shutdown`]) aborts them.
pub struct SyncTriggers {
    handles: Vec<JoinHandle<()>>,
}

impl SyncTriggers {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn periodic(mut self, engine: Arc<SyncEngine>, interval_secs: u64) -> Self {
        let scheduler = SyncScheduler::new(engine, interval_secs);
        self.handles.push(tokio::spawn(scheduler.start()));
        self
    }

    /// Sync on every offline to online edge.
    pub fn on_reconnect(mut self, engine: Arc<SyncEngine>) -> Self {
        let mut online = engine.connectivity().subscribe();
        self.handles.push(tokio::spawn(async move {
            let mut was_online = *online.borrow_and_update();
            while online.changed().await.is_ok() {
                let now_online = *online.borrow_and_update();
                if now_online && !was_online {
                    run_logged(&engine, SyncTrigger::Connectivity).await;
                }
                was_online = now_online;
            }
        }));
        self
    }

    /// Sync and refresh on every push event.
    pub fn on_push(mut self, engine: Arc<SyncEngine>, mut events: ChangeSubscription) -> Self {
        self.handles.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = engine.handle_change(&event).await {
                    warn!("push-triggered sync failed: {:?}", e);
                }
            }
        }));
        self
    }

    pub fn shutdown(mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Default for SyncTriggers {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SyncTriggers {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
