pub mod queue;
pub mod task;

pub use queue::{OpKind, QueueEntry};
pub use task::{SyncState, Task, TaskDraft, TaskPriority, TaskStatus};
