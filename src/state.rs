use std::sync::Arc;

use crate::services::SyncEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}
