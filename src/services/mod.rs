pub mod scheduler;
pub mod sync_engine;

pub use scheduler::{SyncScheduler, SyncTriggers};
pub use sync_engine::{EngineState, PassState, RefreshStats, SyncEngine, SyncOutcome, SyncTrigger};
