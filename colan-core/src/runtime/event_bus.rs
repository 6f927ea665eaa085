//! In-process broadcast bus.
//!
//! Subscribers that fall behind lose old events (broadcast channel
//! semantics); status events are snapshots, so a lagging consumer
//! self-heals on the next one.

use async_trait::async_trait;
use colan_model::TransactionId;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::ports::broadcast::{EntityStatusPayload, StatusBroadcaster};
use crate::runtime::events::InsightEvent;

pub struct InProcStatusBus {
    tx: broadcast::Sender<InsightEvent>,
}

impl std::fmt::Debug for InProcStatusBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcStatusBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

impl InProcStatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InsightEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: InsightEvent) {
        // No receivers is not an error; events are fire-and-forget.
        if self.tx.send(event).is_err() {
            debug!("event dropped, no subscribers");
        }
    }
}

impl Default for InProcStatusBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl StatusBroadcaster for InProcStatusBus {
    async fn publish_entity_status(&self, payload: EntityStatusPayload) -> Result<()> {
        self.emit(InsightEvent::EntityStatus(payload));
        Ok(())
    }

    async fn publish_start(
        &self,
        version_start: TransactionId,
        version_end: TransactionId,
    ) -> Result<()> {
        self.emit(InsightEvent::ReconcileStarted {
            version_start,
            version_end,
        });
        Ok(())
    }

    async fn publish_end(&self, processed_count: usize) -> Result<()> {
        self.emit(InsightEvent::ReconcileFinished {
            processed: processed_count,
        });
        Ok(())
    }

    async fn publish_status(&self, status: &str) -> Result<()> {
        self.emit(InsightEvent::WorkerStatus {
            status: status.to_string(),
        });
        Ok(())
    }
}
