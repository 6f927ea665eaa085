//! Collaborator contracts at the engine boundary.
//!
//! These are logical contracts, not wire formats: an implementer may back
//! them with HTTP, an RPC layer, or in-process services. Payloads are
//! decoded into typed values once, here at the boundary, so the services
//! never probe loosely shaped maps.

pub mod broadcast;
pub mod catalog;
pub mod changelog;
pub mod compute;
pub mod intelligence;
pub mod storage;
pub mod vector;

pub use broadcast::{EntityStatusPayload, StatusBroadcaster};
pub use catalog::CatalogStore;
pub use changelog::{ChangeLogReader, WatermarkStore};
pub use compute::{
    ComputeJobClient, DetectedFace, JobCompletionHandler, JobDetails, JobOutput,
    JobUpdate, SharedCompletionHandler,
};
pub use intelligence::{IntelligenceStore, RecordTransform};
pub use storage::{DirStorage, StorageResolver};
pub use vector::{StoredVector, VectorMatch, VectorPayload, VectorStore};
