//! Contract for the external compute-job collaborator.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use colan_model::face::{FaceBox, FaceLandmarks};
use colan_model::{JobId, JobStatus, TaskKind};

use crate::Result;

/// Minimal payload carried by a push notification. Full output requires a
/// separate [`ComputeJobClient::get_job`] fetch.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub progress: Option<f32>,
}

impl JobUpdate {
    pub fn completed(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            error_message: None,
            progress: None,
        }
    }

    pub fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            error_message: Some(error.into()),
            progress: None,
        }
    }
}

/// One face reported by the detector, already decoded.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Path of the cropped face image within the job's output tree.
    pub file_path: String,
    pub bbox: FaceBox,
    pub confidence: f32,
    pub landmarks: FaceLandmarks,
}

/// Typed job output, decoded once at the collaborator boundary.
#[derive(Debug, Clone)]
pub enum JobOutput {
    FaceDetection { faces: Vec<DetectedFace> },
    /// Embedding tasks write their vector to a file in the job output tree.
    EmbeddingFile { path: String },
    HlsManifest { manifest_path: String },
}

/// Full job state as fetched from the compute collaborator.
#[derive(Debug, Clone)]
pub struct JobDetails {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub output: Option<JobOutput>,
}

/// Completion hook invoked by the collaborator when a job reaches a
/// terminal state. Delivery may happen more than once (push notification
/// plus a manual poll); the engine wraps handlers to absorb duplicates.
#[async_trait]
pub trait JobCompletionHandler: Send + Sync {
    async fn on_update(&self, update: JobUpdate);
}

pub type SharedCompletionHandler = Arc<dyn JobCompletionHandler>;

#[async_trait]
pub trait ComputeJobClient: Send + Sync {
    /// Submit a job without waiting for it to finish. `on_complete` fires
    /// when the collaborator observes a terminal state.
    async fn submit(
        &self,
        task: TaskKind,
        input: &Path,
        on_complete: SharedCompletionHandler,
    ) -> Result<JobId>;

    /// Fetch the full job record, including decoded output when terminal.
    async fn get_job(&self, job_id: &JobId) -> Result<Option<JobDetails>>;

    /// Download a file from the job's output tree to `dest`.
    async fn download_job_file(
        &self,
        job_id: &JobId,
        relative_path: &str,
        dest: &Path,
    ) -> Result<()>;

    /// Download and decode a serialized embedding vector from the job's
    /// output tree.
    async fn fetch_embedding(&self, job_id: &JobId, relative_path: &str) -> Result<Vec<f32>>;
}
