//! Derived face artifacts: detections, identity clusters, match audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, FaceId, PersonId};

/// Axis-aligned bounding box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Five-point facial landmarks as emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub right_eye: [f32; 2],
    pub left_eye: [f32; 2],
    pub nose_tip: [f32; 2],
    pub mouth_right: [f32; 2],
    pub mouth_left: [f32; 2],
}

/// One detected face within an entity's image.
///
/// Created by the callback handler when face detection completes; deleted
/// alongside the parent entity (cascade semantics owned by the catalog).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: FaceId,
    pub entity_id: EntityId,
    pub bbox: FaceBox,
    pub confidence: f32,
    pub landmarks: FaceLandmarks,
    /// Storage-relative path of the cropped face image.
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_person_id: Option<PersonId>,
    pub created_at: DateTime<Utc>,
}

/// Identity cluster linking faces whose embeddings are mutually similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownPerson {
    pub id: PersonId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit row recording one above-threshold similarity hit. All candidate
/// matches are kept, not only the winning one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub face_id: FaceId,
    pub matched_face_id: FaceId,
    pub similarity_score: f32,
    pub created_at: DateTime<Utc>,
}
