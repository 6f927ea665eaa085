//! Contract for the relational catalog (entities and derived face state).
//!
//! The engine reads entities and exclusively owns the Face / KnownPerson /
//! FaceMatch derived rows; the catalog handles cascade deletion alongside
//! the parent entity.

use async_trait::async_trait;
use colan_model::{EntityId, EntityRow, Face, FaceId, FaceMatch, KnownPerson, PersonId};

use crate::Result;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Current state of an entity, or `None` when hard-deleted.
    async fn fetch_entity(&self, id: EntityId) -> Result<Option<EntityRow>>;

    async fn fetch_face(&self, id: FaceId) -> Result<Option<Face>>;

    /// Insert or replace a face row keyed by its deterministic id.
    async fn upsert_face(&self, face: Face) -> Result<Face>;

    async fn link_face_to_person(&self, face: FaceId, person: PersonId) -> Result<()>;

    /// Allocate a fresh identity cluster.
    async fn create_person(&self) -> Result<KnownPerson>;

    async fn record_face_match(&self, m: FaceMatch) -> Result<()>;
}
