//! Contract for publishing status to interested listeners.
//!
//! Fire-and-forget: callers log publish failures and move on; a broken bus
//! never affects job bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use colan_model::{EntityId, InferenceStatus, JobInfo, OverallStatus, TransactionId};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Snapshot of one entity's intelligence state, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStatusPayload {
    pub entity_id: EntityId,
    pub overall_status: OverallStatus,
    pub inference: InferenceStatus,
    pub active_jobs: Vec<JobInfo>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait StatusBroadcaster: Send + Sync {
    async fn publish_entity_status(&self, payload: EntityStatusPayload) -> Result<()>;

    /// A reconciliation pass started over the given version range.
    async fn publish_start(
        &self,
        version_start: TransactionId,
        version_end: TransactionId,
    ) -> Result<()>;

    /// A reconciliation pass finished.
    async fn publish_end(&self, processed_count: usize) -> Result<()>;

    /// Worker heartbeat / liveness status.
    async fn publish_status(&self, status: &str) -> Result<()>;
}
