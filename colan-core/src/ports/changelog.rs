//! Contracts for the append-only entity change log and the reconciliation
//! watermark.

use async_trait::async_trait;
use colan_model::{EntityVersion, TransactionId};

use crate::Result;

#[async_trait]
pub trait ChangeLogReader: Send + Sync {
    /// All versions with a transaction id strictly greater than `after`,
    /// ordered ascending by transaction id.
    async fn versions_after(&self, after: TransactionId) -> Result<Vec<EntityVersion>>;
}

/// Persists the highest transaction id already processed by reconciliation.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark; zero when never written.
    async fn load(&self) -> Result<TransactionId>;

    async fn store(&self, tx: TransactionId) -> Result<()>;
}
