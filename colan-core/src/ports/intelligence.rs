//! Contract for durable storage of per-entity intelligence records.

use async_trait::async_trait;
use colan_model::{EntityId, IntelligenceRecord};

use crate::Result;

/// Pure transformation applied to a record under row-level locking.
pub type RecordTransform = Box<dyn FnOnce(&mut IntelligenceRecord) + Send>;

/// Storage for the denormalized intelligence blob, one row per entity.
///
/// `atomic_update` must run the transform under genuine row-level locking
/// in the backing store; the engine's per-entity mutex alone is not enough
/// once multiple processes share the same store.
#[async_trait]
pub trait IntelligenceStore: Send + Sync {
    async fn get(&self, entity_id: EntityId) -> Result<Option<IntelligenceRecord>>;

    async fn put(&self, record: IntelligenceRecord) -> Result<()>;

    /// Read-transform-write in one locked step. Returns the updated record,
    /// or `None` when the entity has no record.
    async fn atomic_update(
        &self,
        entity_id: EntityId,
        transform: RecordTransform,
    ) -> Result<Option<IntelligenceRecord>>;

    /// Like `atomic_update`, but seeds the row with `init` when absent
    /// before applying the transform.
    async fn atomic_upsert(
        &self,
        entity_id: EntityId,
        init: IntelligenceRecord,
        transform: RecordTransform,
    ) -> Result<IntelligenceRecord>;

    async fn delete(&self, entity_id: EntityId) -> Result<()>;
}
