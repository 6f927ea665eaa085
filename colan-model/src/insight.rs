//! Per-entity intelligence state: job bookkeeping and derived statuses.
//!
//! One [`IntelligenceRecord`] exists per entity. It is a denormalized blob
//! owned by the orchestration core and must only be mutated through the
//! engine's per-entity critical section.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, JobId};

/// The ML task types the compute collaborator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    FaceDetection,
    ClipEmbedding,
    DinoEmbedding,
    HlsStreaming,
    FaceEmbedding,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::FaceDetection => "face_detection",
            TaskKind::ClipEmbedding => "clip_embedding",
            TaskKind::DinoEmbedding => "dino_embedding",
            TaskKind::HlsStreaming => "hls_streaming",
            TaskKind::FaceEmbedding => "face_embedding",
        }
    }

    /// Tasks whose status is tracked per detected face rather than as a
    /// single scalar field.
    pub fn is_per_face(&self) -> bool {
        matches!(self, TaskKind::FaceEmbedding)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one submitted compute job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of one task type on one entity.
///
/// `Available` marks streaming-style output that is usable before the job
/// finishes (an hls manifest with enough segments to start playback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Running,
    Available,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Processing | TaskStatus::Running
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Running => "running",
            TaskStatus::Available => "available",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl From<JobStatus> for TaskStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => TaskStatus::Pending,
            JobStatus::Processing => TaskStatus::Processing,
            JobStatus::Running => TaskStatus::Running,
            JobStatus::Completed => TaskStatus::Completed,
            JobStatus::Failed => TaskStatus::Failed,
        }
    }
}

/// Aggregate status over every task tracked for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverallStatus::Queued => "queued",
            OverallStatus::Processing => "processing",
            OverallStatus::Completed => "completed",
            OverallStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One submitted unit of work.
///
/// Created as `Queued` on submission; terminal entries are moved from
/// `active_jobs` to `job_history` and never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: JobId,
    pub task: TaskKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    /// Slot index for per-face tasks; `None` for scalar tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_index: Option<usize>,
}

impl JobInfo {
    pub fn queued(job_id: JobId, task: TaskKind, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            task,
            status: JobStatus::Queued,
            started_at: now,
            completed_at: None,
            error_message: None,
            progress: None,
            face_index: None,
        }
    }

    pub fn queued_for_face(
        job_id: JobId,
        index: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            face_index: Some(index),
            ..Self::queued(job_id, TaskKind::FaceEmbedding, now)
        }
    }

    /// Synthetic terminal entry recording a submission that never reached
    /// the compute collaborator.
    pub fn failed_submission(
        job_id: JobId,
        task: TaskKind,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            task,
            status: JobStatus::Failed,
            started_at: now,
            completed_at: Some(now),
            error_message: Some(error.into()),
            progress: None,
            face_index: None,
        }
    }
}

/// Per-task-type status fields, the source the overall status is computed
/// from. `face_embeddings` holds one slot per detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceStatus {
    pub face_detection: TaskStatus,
    pub clip_embedding: TaskStatus,
    pub dino_embedding: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hls_streaming: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub face_embeddings: Vec<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_count: Option<usize>,
}

impl Default for InferenceStatus {
    fn default() -> Self {
        Self {
            face_detection: TaskStatus::Pending,
            clip_embedding: TaskStatus::Pending,
            dino_embedding: TaskStatus::Pending,
            hls_streaming: None,
            face_embeddings: Vec::new(),
            face_count: None,
        }
    }
}

impl InferenceStatus {
    /// Every status relevant to aggregation, list-valued fields spread.
    pub fn statuses(&self) -> Vec<TaskStatus> {
        let mut all = vec![
            self.face_detection,
            self.clip_embedding,
            self.dino_embedding,
        ];
        if let Some(hls) = self.hls_streaming {
            all.push(hls);
        }
        all.extend(self.face_embeddings.iter().copied());
        all
    }

    /// Scalar status field for a task type. `None` for per-face tasks,
    /// which are addressed by slot instead.
    pub fn scalar_mut(&mut self, task: TaskKind) -> Option<&mut TaskStatus> {
        match task {
            TaskKind::FaceDetection => Some(&mut self.face_detection),
            TaskKind::ClipEmbedding => Some(&mut self.clip_embedding),
            TaskKind::DinoEmbedding => Some(&mut self.dino_embedding),
            TaskKind::HlsStreaming => {
                Some(self.hls_streaming.get_or_insert(TaskStatus::Pending))
            }
            TaskKind::FaceEmbedding => None,
        }
    }

    pub fn scalar(&self, task: TaskKind) -> Option<TaskStatus> {
        match task {
            TaskKind::FaceDetection => Some(self.face_detection),
            TaskKind::ClipEmbedding => Some(self.clip_embedding),
            TaskKind::DinoEmbedding => Some(self.dino_embedding),
            TaskKind::HlsStreaming => self.hls_streaming,
            TaskKind::FaceEmbedding => None,
        }
    }
}

/// Denormalized per-entity intelligence state.
///
/// Invariants:
/// - `active_processing_md5` must equal the entity's current content hash
///   for any update to be considered non-stale.
/// - a job id appears at most once in `active_jobs`.
/// - entries in `job_history` are immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceRecord {
    pub entity_id: EntityId,
    pub overall_status: OverallStatus,
    pub active_processing_md5: String,
    pub active_jobs: Vec<JobInfo>,
    pub job_history: Vec<JobInfo>,
    pub inference: InferenceStatus,
    pub last_updated: DateTime<Utc>,
}

impl IntelligenceRecord {
    pub fn new(entity_id: EntityId, md5: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            overall_status: OverallStatus::Queued,
            active_processing_md5: md5.into(),
            active_jobs: Vec::new(),
            job_history: Vec::new(),
            inference: InferenceStatus::default(),
            last_updated: now,
        }
    }

    /// Point the record at new content. A changed hash starts a fresh
    /// inference cycle: per-task statuses from the previous content are
    /// reset so results for the old hash can no longer satisfy skip
    /// checks. Returns whether the hash changed.
    pub fn rebind_content(&mut self, md5: &str) -> bool {
        if self.active_processing_md5 == md5 {
            return false;
        }
        self.active_processing_md5 = md5.to_string();
        self.inference = InferenceStatus::default();
        // In-flight jobs belong to the old content; their results would
        // be rejected anyway, so they are dropped rather than retired.
        self.active_jobs.clear();
        true
    }

    pub fn active_job(&self, job_id: &JobId) -> Option<&JobInfo> {
        self.active_jobs.iter().find(|j| &j.job_id == job_id)
    }

    pub fn active_job_mut(&mut self, job_id: &JobId) -> Option<&mut JobInfo> {
        self.active_jobs.iter_mut().find(|j| &j.job_id == job_id)
    }

    pub fn active_job_for_task(&self, task: TaskKind) -> Option<&JobInfo> {
        self.active_jobs.iter().find(|j| j.task == task)
    }

    /// Active per-face job addressing a specific slot.
    pub fn active_job_for_slot(&self, task: TaskKind, index: usize) -> Option<&JobInfo> {
        self.active_jobs
            .iter()
            .find(|j| j.task == task && j.face_index == Some(index))
    }

    /// Append a job unless one with the same id is already registered.
    /// Returns whether the job was inserted.
    pub fn register_job(&mut self, job: JobInfo) -> bool {
        if self.active_job(&job.job_id).is_some() {
            return false;
        }
        self.active_jobs.push(job);
        true
    }

    /// Move a job out of `active_jobs` into `job_history`. Returns the
    /// retired entry, or `None` when the id is not active.
    pub fn retire_job(&mut self, job_id: &JobId) -> Option<JobInfo> {
        let pos = self.active_jobs.iter().position(|j| &j.job_id == job_id)?;
        let job = self.active_jobs.remove(pos);
        self.job_history.push(job.clone());
        Some(job)
    }

    /// Drop a stale active job without recording it in history (content
    /// changed mid-flight; the result was discarded).
    pub fn discard_job(&mut self, job_id: &JobId) -> Option<JobInfo> {
        let pos = self.active_jobs.iter().position(|j| &j.job_id == job_id)?;
        Some(self.active_jobs.remove(pos))
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}
