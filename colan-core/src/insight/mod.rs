//! The job-orchestration and intelligence-state-reconciliation engine.

pub mod callbacks;
pub mod locks;
pub mod once;
pub mod reconcile;
pub mod status;
pub mod submission;
pub mod worker;

pub use callbacks::JobCallbackHandler;
pub use locks::EntityLocks;
pub use once::OnceHook;
pub use reconcile::MediaInsight;
pub use status::aggregate;
pub use submission::{JobSubmissionService, SubmitOutcome};
pub use worker::InsightWorker;
