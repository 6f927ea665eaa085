//! Core data model definitions shared across CoLAN Store crates.

pub mod entity;
pub mod error;
pub mod face;
pub mod ids;
pub mod insight;

pub use entity::{EntityKind, EntityRow, EntityVersion};
pub use error::{ModelError, Result as ModelResult};
pub use face::{Face, FaceBox, FaceLandmarks, FaceMatch, KnownPerson};
pub use ids::{EntityId, FaceId, JobId, PersonId, TransactionId};
pub use insight::{
    InferenceStatus, IntelligenceRecord, JobInfo, JobStatus, OverallStatus,
    TaskKind, TaskStatus,
};
