//! Orchestration core for the CoLAN Store media catalog.
//!
//! Catalog entities are enriched asynchronously by external ML workers
//! (face detection, CLIP/DINO embeddings, face recognition). This crate
//! owns the part with real concurrency and consistency concerns: deciding
//! which jobs to submit, serializing concurrent updates to each entity's
//! denormalized intelligence state, deduplicating completion callbacks,
//! reconciling the versioned change log into job submissions, and deriving
//! a single overall status from independent sub-task statuses.
//!
//! Everything at the boundary — the relational catalog, the change log,
//! the compute-job client, the vector stores, file storage, the status
//! bus — is reached through the contracts in [`ports`].

pub mod config;
pub mod error;
pub mod insight;
pub mod ports;
pub mod retry;
pub mod runtime;

pub use config::InsightConfig;
pub use error::{InsightError, Result};
pub use insight::callbacks::JobCallbackHandler;
pub use insight::reconcile::MediaInsight;
pub use insight::submission::{JobSubmissionService, SubmitOutcome, SubmitRequest};
pub use insight::worker::{InsightWorker, WorkerHandle};
pub use runtime::{InProcStatusBus, InsightEvent};
