//! Contract for similarity search over fixed-dimension float vectors.

use async_trait::async_trait;
use colan_model::{EntityId, FaceId, PersonId};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Payload stored alongside each vector, echoed back on search hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub entity_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_id: Option<FaceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_person_id: Option<PersonId>,
}

impl VectorPayload {
    pub fn for_entity(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            face_id: None,
            known_person_id: None,
        }
    }

    pub fn for_face(
        entity_id: EntityId,
        face_id: FaceId,
        known_person_id: Option<PersonId>,
    ) -> Self {
        Self {
            entity_id,
            face_id: Some(face_id),
            known_person_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredVector {
    pub id: i64,
    pub embedding: Vec<f32>,
    pub payload: VectorPayload,
}

/// One search hit. Results are ordered by descending score.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: i64,
    pub score: f32,
    pub payload: VectorPayload,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the vector at `id`. Returns false when the store
    /// rejected the point (e.g. dimension mismatch at the collection).
    async fn upsert(&self, id: i64, embedding: &[f32], payload: VectorPayload) -> Result<bool>;

    async fn fetch(&self, id: i64) -> Result<Option<StoredVector>>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Nearest neighbors above `score_threshold`, best first.
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<VectorMatch>>;
}
