//! Domain events published by the Engine and Reconciler. A separate
//! read-model (Control API, logs, a future UI) subscribes; the Engine
//! never holds a reference back to any consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::package::PackageName;
use crate::version::PackageVersion;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    UpgradeAvailable {
        package: PackageName,
        current_version: PackageVersion,
        available_version: PackageVersion,
        at: DateTime<Utc>,
    },
    UpdateStarted {
        package: PackageName,
        update_id: uuid::Uuid,
        from_version: PackageVersion,
        target_version: PackageVersion,
        at: DateTime<Utc>,
    },
    StepCompleted {
        package: PackageName,
        update_id: uuid::Uuid,
        step: String,
        at: DateTime<Utc>,
    },
    UpdateFinished {
        package: PackageName,
        update_id: uuid::Uuid,
        status: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn package(&self) -> &PackageName {
        match self {
            Event::UpgradeAvailable { package, .. }
            | Event::UpdateStarted { package, .. }
            | Event::StepCompleted { package, .. }
            | Event::UpdateFinished { package, .. } => package,
        }
    }
}

/// Lightweight pub/sub: a single broadcast channel shared by every
/// publisher (Engine, Reconciler) and consumer (Control API, logs). No
/// consumer can mutate engine-owned state through this handle.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // A closed/lagging receiver is not a publishing error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
