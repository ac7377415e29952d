//! Push notifications about tasks changed by other clients.
//!
//! [`ChangeBus`] is the typed fan-out point; [`ChangeNotifier`] feeds it from
//! the server's WebSocket channel.

pub mod socket;

use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::models::Task;

pub use socket::{Backoff, ChangeNotifier, NotifierConfig};

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Created(Task),
    Updated(Task),
    Deleted(i64),
}

impl ChangeEvent {
    pub fn task_id(&self) -> i64 {
        match self {
            ChangeEvent::Created(task) | ChangeEvent::Updated(task) => task.id,
            ChangeEvent::Deleted(id) => *id,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireMessage {
    #[serde(rename = "CHORE_CREATED")]
    Created { chore: Task },
    #[serde(rename = "CHORE_UPDATED")]
    Updated { chore: Task },
    #[serde(rename = "CHORE_DELETED")]
    Deleted {
        #[serde(rename = "choreId")]
        chore_id: i64,
    },
    #[serde(other)]
    Other,
}

/// Decode one server push. Message types we do not track yield `Ok(None)`.
pub fn parse_message(text: &str) -> Result<Option<ChangeEvent>, serde_json::Error> {
    let event = match serde_json::from_str::<WireMessage>(text)? {
        WireMessage::Created { chore } => Some(ChangeEvent::Created(chore)),
        WireMessage::Updated { chore } => Some(ChangeEvent::Updated(chore)),
        WireMessage::Deleted { chore_id } => Some(ChangeEvent::Deleted(chore_id)),
        WireMessage::Other => None,
    };
    Ok(event)
}

pub fn auth_message(user_id: i64) -> String {
    serde_json::json!({ "type": "AUTH", "userId": user_id }).to_string()
}

#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Returns how many subscribers saw the event.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on the push event stream. Dropping it unsubscribes.
pub struct ChangeSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("change subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
