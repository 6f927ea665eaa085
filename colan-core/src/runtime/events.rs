//! Events emitted by the orchestration core.

use colan_model::TransactionId;
use serde::{Deserialize, Serialize};

use crate::ports::broadcast::EntityStatusPayload;

/// Everything the core publishes on the in-process bus. Consumers decide
/// what to forward to external surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InsightEvent {
    EntityStatus(EntityStatusPayload),
    ReconcileStarted {
        version_start: TransactionId,
        version_end: TransactionId,
    },
    ReconcileFinished {
        processed: usize,
    },
    WorkerStatus {
        status: String,
    },
}
