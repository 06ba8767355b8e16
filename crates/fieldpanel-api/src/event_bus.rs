//! Fan-out of dashboard events to every connected WebSocket client.

use fieldpanel_core::TrialId;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::batch::BatchStatus;
use crate::metrics::EVENTS_PUBLISHED_TOTAL;

const CHANNEL_CAPACITY: usize = 256;

/// Serialized as `{"event": "<snake_case name>", ...fields}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PanelEvent {
    TrialStarted {
        trial_id: TrialId,
        #[serde(skip_serializing_if = "Option::is_none")]
        batch_status: Option<BatchStatus>,
    },
    TrialStopped {
        trial_id: TrialId,
    },
    TrialRemoved {
        trial_id: TrialId,
    },
    BatchStarted {
        trials: Vec<TrialId>,
        batch_status: BatchStatus,
    },
    BatchUpdate {
        batch_status: BatchStatus,
    },
    BatchComplete {
        batch_status: BatchStatus,
    },
    BatchCancelled,
    BatchStopped {
        containers: Vec<String>,
    },
    ReconstructionStarted {
        trial_id: TrialId,
    },
}

impl PanelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PanelEvent::TrialStarted { .. } => "trial_started",
            PanelEvent::TrialStopped { .. } => "trial_stopped",
            PanelEvent::TrialRemoved { .. } => "trial_removed",
            PanelEvent::BatchStarted { .. } => "batch_started",
            PanelEvent::BatchUpdate { .. } => "batch_update",
            PanelEvent::BatchComplete { .. } => "batch_complete",
            PanelEvent::BatchCancelled => "batch_cancelled",
            PanelEvent::BatchStopped { .. } => "batch_stopped",
            PanelEvent::ReconstructionStarted { .. } => "reconstruction_started",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PanelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Deliver to current subscribers; a bus without listeners drops the event.
    pub fn publish(&self, event: PanelEvent) {
        EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[event.name()])
            .inc();
        if self.tx.send(event).is_err() {
            debug!("No dashboard clients connected");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
