use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Strongly typed ID for catalog entities. Stable across versions of the
/// same entity in the change log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityId(pub i64);

impl EntityId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic change-log transaction id. Strictly increasing per entity;
/// the log only appends.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque job identifier assigned by the compute collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Stride between face ids of consecutive entities. Bounds the number of
/// faces a single image may produce.
pub const FACE_ID_STRIDE: i64 = 10_000;

/// Strongly typed ID for detected faces.
///
/// Face ids are derived, not allocated: `entity_id * 10_000 + index`. The
/// same detection result always maps to the same ids, so replaying a
/// completed face-detection job upserts rather than duplicates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FaceId(pub i64);

impl FaceId {
    pub fn derive(entity: EntityId, index: usize) -> Result<Self, ModelError> {
        if index as i64 >= FACE_ID_STRIDE {
            return Err(ModelError::InvalidId(format!(
                "face index {index} exceeds stride {FACE_ID_STRIDE}"
            )));
        }
        Ok(FaceId(entity.0 * FACE_ID_STRIDE + index as i64))
    }

    /// Entity this face id was derived from.
    pub fn entity(&self) -> EntityId {
        EntityId(self.0 / FACE_ID_STRIDE)
    }

    /// Position of the face within its detection batch.
    pub fn index(&self) -> usize {
        (self.0 % FACE_ID_STRIDE) as usize
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for FaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed ID for identity clusters ("known persons").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PersonId(pub i64);

impl PersonId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for PersonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_id_round_trips_entity_and_index() {
        let entity = EntityId(42);
        let face = FaceId::derive(entity, 3).unwrap();
        assert_eq!(face.0, 420_003);
        assert_eq!(face.entity(), entity);
        assert_eq!(face.index(), 3);
    }

    #[test]
    fn face_id_is_deterministic() {
        let a = FaceId::derive(EntityId(7), 1).unwrap();
        let b = FaceId::derive(EntityId(7), 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn face_id_rejects_out_of_range_index() {
        assert!(FaceId::derive(EntityId(1), FACE_ID_STRIDE as usize).is_err());
    }
}
