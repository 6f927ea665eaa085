//! Job submission: skip decisions, compute dispatch, record bookkeeping.
//!
//! All submission decisions and record mutations for one entity run inside
//! that entity's critical section, so two concurrent triggers (duplicate
//! reconciliation passes, a callback fan-out racing a manual trigger)
//! cannot double-submit the same task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colan_model::{
    EntityId, IntelligenceRecord, JobId, JobInfo, JobStatus, TaskKind, TaskStatus,
};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::InsightConfig;
use crate::error::Result;
use crate::insight::locks::EntityLocks;
use crate::insight::once::OnceHook;
use crate::insight::status::aggregate;
use crate::ports::broadcast::{EntityStatusPayload, StatusBroadcaster};
use crate::ports::compute::{
    ComputeJobClient, JobCompletionHandler, JobUpdate, SharedCompletionHandler,
};
use crate::ports::intelligence::IntelligenceStore;
use crate::ports::storage::StorageResolver;
use crate::retry::RetryPolicy;

/// One submission request. `md5` is the content hash the resulting work
/// will be attributed to; for per-face tasks it is the parent entity's
/// hash and `face_index` addresses the status slot.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub entity_id: EntityId,
    pub task: TaskKind,
    pub md5: String,
    /// Storage-relative path of the input file.
    pub relative_path: String,
    pub face_index: Option<usize>,
}

/// Result of a submission attempt. Failures are reported here and through
/// status fields, never as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new job was created.
    Submitted(JobId),
    /// An equivalent job is already in flight; its id is returned.
    InFlight(JobId),
    /// The work is already done (or usable) for this content.
    Ready,
    /// Submission failed; a synthetic failed job records the error.
    Failed,
}

/// Skip decision taken under the entity lock before submitting.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Skip {
    InFlight(JobId),
    Ready,
}

fn should_skip(
    record: &IntelligenceRecord,
    task: TaskKind,
    md5: &str,
    face_index: Option<usize>,
) -> Option<Skip> {
    // A different hash means new content; nothing from the previous
    // cycle, finished or still in flight, can satisfy this request.
    if record.active_processing_md5 != md5 {
        return None;
    }

    if task.is_per_face() {
        return should_skip_per_face(record, task, face_index);
    }

    let status = record.inference.scalar(task)?;
    if status.is_in_progress() {
        if let Some(job) = record.active_job_for_task(task) {
            return Some(Skip::InFlight(job.job_id.clone()));
        }
        return None;
    }
    match status {
        TaskStatus::Available | TaskStatus::Completed => Some(Skip::Ready),
        _ => None,
    }
}

fn should_skip_per_face(
    record: &IntelligenceRecord,
    task: TaskKind,
    face_index: Option<usize>,
) -> Option<Skip> {
    let slots = &record.inference.face_embeddings;

    if let Some(index) = face_index {
        let slot = *slots.get(index)?;
        if slot.is_in_progress() {
            if let Some(job) = record.active_job_for_slot(task, index) {
                return Some(Skip::InFlight(job.job_id.clone()));
            }
            return None;
        }
        if slot == TaskStatus::Completed {
            return Some(Skip::Ready);
        }
        return None;
    }

    // Whole-list view: terminal only when every slot is terminal.
    if !slots.is_empty() && slots.iter().all(TaskStatus::is_terminal) {
        return Some(Skip::Ready);
    }
    if slots.iter().any(TaskStatus::is_in_progress) {
        if let Some(job) = record.active_job_for_task(task) {
            return Some(Skip::InFlight(job.job_id.clone()));
        }
    }
    None
}

pub struct JobSubmissionService {
    config: Arc<InsightConfig>,
    compute: Arc<dyn ComputeJobClient>,
    intelligence: Arc<dyn IntelligenceStore>,
    storage: Arc<dyn StorageResolver>,
    broadcaster: Arc<dyn StatusBroadcaster>,
    locks: EntityLocks,
    retry: RetryPolicy,
}

impl std::fmt::Debug for JobSubmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSubmissionService").finish_non_exhaustive()
    }
}

impl JobSubmissionService {
    pub fn new(
        config: Arc<InsightConfig>,
        compute: Arc<dyn ComputeJobClient>,
        intelligence: Arc<dyn IntelligenceStore>,
        storage: Arc<dyn StorageResolver>,
        broadcaster: Arc<dyn StatusBroadcaster>,
    ) -> Self {
        let locks = EntityLocks::new(config.lock_shards);
        let retry = RetryPolicy::new(config.retry);
        Self {
            config,
            compute,
            intelligence,
            storage,
            broadcaster,
            locks,
            retry,
        }
    }

    /// Current intelligence record for an entity.
    pub async fn record(&self, entity_id: EntityId) -> Result<Option<IntelligenceRecord>> {
        self.intelligence.get(entity_id).await
    }

    /// Submit one task for an entity, holding the entity lock across the
    /// skip check, the compute call, and the registration.
    ///
    /// Never returns an error: any failure is recorded as a synthetic
    /// failed job and reported as [`SubmitOutcome::Failed`].
    pub async fn submit(
        &self,
        req: SubmitRequest,
        on_complete: SharedCompletionHandler,
    ) -> SubmitOutcome {
        let shard = self.locks.shard(req.entity_id);
        let _guard = shard.lock().await;

        match self.intelligence.get(req.entity_id).await {
            Ok(Some(record)) => {
                match should_skip(&record, req.task, &req.md5, req.face_index) {
                    Some(Skip::InFlight(job_id)) => {
                        debug!(
                            entity_id = %req.entity_id,
                            task = %req.task,
                            job_id = %job_id,
                            "submission skipped, job already in flight"
                        );
                        return SubmitOutcome::InFlight(job_id);
                    }
                    Some(Skip::Ready) => {
                        debug!(
                            entity_id = %req.entity_id,
                            task = %req.task,
                            "submission skipped, work already done for this content"
                        );
                        return SubmitOutcome::Ready;
                    }
                    None => {}
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(entity_id = %req.entity_id, task = %req.task, "record read failed: {e}");
                return self.register_failed_job(&req, format!("record read failed: {e}")).await;
            }
        }

        let input = self.storage.absolute_path(&req.relative_path);
        if tokio::fs::metadata(&input).await.is_err() {
            warn!(
                entity_id = %req.entity_id,
                task = %req.task,
                path = %input.display(),
                "input file missing, not submitting"
            );
            return self
                .register_failed_job(&req, format!("input file missing: {}", input.display()))
                .await;
        }

        let hook = OnceHook::wrap(on_complete);
        let shared: SharedCompletionHandler = hook.clone();

        let job_id = match self.compute.submit(req.task, &input, shared).await {
            Ok(job_id) => job_id,
            Err(e) => {
                error!(entity_id = %req.entity_id, task = %req.task, "compute submit failed: {e}");
                return self.register_failed_job(&req, e.to_string()).await;
            }
        };

        if let Err(e) = self.register_job(&req, &job_id).await {
            error!(
                entity_id = %req.entity_id,
                job_id = %job_id,
                "job registration failed: {e}"
            );
            return self.register_failed_job(&req, format!("registration failed: {e}")).await;
        }

        info!(
            entity_id = %req.entity_id,
            task = %req.task,
            job_id = %job_id,
            "job submitted"
        );

        self.spawn_completion_probe(job_id.clone(), hook);

        SubmitOutcome::Submitted(job_id)
    }

    async fn register_job(&self, req: &SubmitRequest, job_id: &JobId) -> Result<()> {
        let now = Utc::now();
        let init = IntelligenceRecord::new(req.entity_id, req.md5.clone(), now);
        let record = self
            .retry
            .run("register job", || {
                let init = init.clone();
                let job_id = job_id.clone();
                let md5 = req.md5.clone();
                let task = req.task;
                let face_index = req.face_index;
                self.intelligence.atomic_upsert(
                    req.entity_id,
                    init,
                    Box::new(move |record| {
                        // Re-uploaded content starts a fresh cycle; the
                        // record must carry the hash this job works on or
                        // the safety check will discard its result.
                        record.rebind_content(&md5);
                        record.overall_status = colan_model::OverallStatus::Processing;
                        match face_index {
                            Some(index) => {
                                let slots = &mut record.inference.face_embeddings;
                                if slots.len() <= index {
                                    slots.resize(index + 1, TaskStatus::Pending);
                                }
                                slots[index] = TaskStatus::Processing;
                                record.register_job(JobInfo::queued_for_face(job_id, index, now));
                            }
                            None => {
                                if let Some(status) = record.inference.scalar_mut(task) {
                                    *status = TaskStatus::Processing;
                                }
                                record.register_job(JobInfo::queued(job_id, task, now));
                            }
                        }
                        record.touch(now);
                    }),
                )
            })
            .await?;

        self.broadcast_record(&record).await;
        Ok(())
    }

    /// Record a submission that never produced a real job: a synthetic
    /// failed entry goes straight into history and the task's status field
    /// is set to failed.
    async fn register_failed_job(&self, req: &SubmitRequest, error: String) -> SubmitOutcome {
        let now = Utc::now();
        let job_id = JobId::new(format!("failed-{}", Uuid::new_v4()));
        let init = IntelligenceRecord::new(req.entity_id, req.md5.clone(), now);
        let task = req.task;
        let face_index = req.face_index;

        let result = self
            .intelligence
            .atomic_upsert(
                req.entity_id,
                init,
                Box::new(move |record| {
                    record
                        .job_history
                        .push(JobInfo::failed_submission(job_id, task, error, now));
                    match face_index {
                        Some(index) => {
                            let slots = &mut record.inference.face_embeddings;
                            if slots.len() <= index {
                                slots.resize(index + 1, TaskStatus::Pending);
                            }
                            slots[index] = TaskStatus::Failed;
                        }
                        None => {
                            if let Some(status) = record.inference.scalar_mut(task) {
                                *status = TaskStatus::Failed;
                            }
                        }
                    }
                    record.overall_status = aggregate(&record.inference);
                    record.touch(now);
                }),
            )
            .await;

        match result {
            Ok(record) => self.broadcast_record(&record).await,
            Err(e) => {
                error!(
                    entity_id = %req.entity_id,
                    task = %req.task,
                    "failed-job bookkeeping also failed: {e}"
                );
            }
        }
        SubmitOutcome::Failed
    }

    fn spawn_completion_probe(&self, job_id: JobId, hook: Arc<OnceHook>) {
        // Jobs can finish faster than the push notification round-trip;
        // poll once shortly after submission and deliver manually if the
        // job is already terminal. The once-only hook absorbs the overlap.
        let compute = Arc::clone(&self.compute);
        let delay = Duration::from_millis(self.config.completion_probe_delay_ms);
        tokio::spawn(async move {
            sleep(delay).await;
            match compute.get_job(&job_id).await {
                Ok(Some(details)) if details.status.is_terminal() => {
                    debug!(job_id = %job_id, "fast completion detected by probe");
                    hook.on_update(JobUpdate {
                        job_id: details.job_id,
                        status: details.status,
                        error_message: details.error_message,
                        progress: None,
                    })
                    .await;
                }
                Ok(_) => {}
                Err(e) => debug!(job_id = %job_id, "completion probe failed: {e}"),
            }
        });
    }

    /// Apply a terminal or intermediate status to an active job.
    ///
    /// Terminal updates retire the job into history, map the task's status
    /// field (scalar tasks only; per-face slots are updated through
    /// [`Self::update_face_slot`]) and recompute the overall status.
    pub async fn update_job_status(
        &self,
        entity_id: EntityId,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let shard = self.locks.shard(entity_id);
        let _guard = shard.lock().await;

        let now = Utc::now();
        let job_id_owned = job_id.clone();
        let updated = self
            .intelligence
            .atomic_update(
                entity_id,
                Box::new(move |record| {
                    let Some(job) = record.active_job_mut(&job_id_owned) else {
                        return;
                    };
                    job.status = status;
                    job.error_message = error_message;
                    if status.is_terminal() {
                        job.completed_at = Some(now);
                    }

                    let task = job.task;
                    if !task.is_per_face() {
                        if let Some(field) = record.inference.scalar_mut(task) {
                            *field = TaskStatus::from(status);
                        }
                    }
                    if status.is_terminal() {
                        record.retire_job(&job_id_owned);
                    }
                    record.overall_status = aggregate(&record.inference);
                    record.touch(now);
                }),
            )
            .await?;

        match updated {
            Some(record) => {
                if record.active_job(job_id).is_none()
                    && !record.job_history.iter().any(|j| &j.job_id == job_id)
                {
                    warn!(entity_id = %entity_id, job_id = %job_id, "status update for unknown job");
                    return Ok(());
                }
                self.broadcast_record(&record).await;
            }
            None => {
                warn!(entity_id = %entity_id, job_id = %job_id, "status update without a record");
            }
        }
        Ok(())
    }

    /// Progress update for an active job. For hls streaming, any positive
    /// progress on a non-terminal job promotes the task to `available`.
    pub async fn update_job_progress(
        &self,
        entity_id: EntityId,
        job_id: &JobId,
        progress: f32,
    ) -> Result<()> {
        let shard = self.locks.shard(entity_id);
        let _guard = shard.lock().await;

        let now = Utc::now();
        let job_id_owned = job_id.clone();
        let updated = self
            .intelligence
            .atomic_update(
                entity_id,
                Box::new(move |record| {
                    let Some(job) = record.active_job_mut(&job_id_owned) else {
                        return;
                    };
                    job.progress = Some(progress);
                    if job.status == JobStatus::Queued {
                        job.status = JobStatus::Running;
                    }

                    if job.task == TaskKind::HlsStreaming && progress > 0.0 {
                        if let Some(field) = record.inference.scalar_mut(TaskKind::HlsStreaming) {
                            if !field.is_terminal() {
                                *field = TaskStatus::Available;
                            }
                        }
                    }
                    record.touch(now);
                }),
            )
            .await?;

        if let Some(record) = updated {
            self.broadcast_record(&record).await;
        }
        Ok(())
    }

    /// Initialize one pending status slot per detected face.
    pub async fn begin_face_embeddings(&self, entity_id: EntityId, count: usize) -> Result<()> {
        let shard = self.locks.shard(entity_id);
        let _guard = shard.lock().await;

        let now = Utc::now();
        let updated = self
            .intelligence
            .atomic_update(
                entity_id,
                Box::new(move |record| {
                    record.inference.face_embeddings = vec![TaskStatus::Pending; count];
                    record.inference.face_count = Some(count);
                    record.overall_status = aggregate(&record.inference);
                    record.touch(now);
                }),
            )
            .await?;

        if let Some(record) = updated {
            self.broadcast_record(&record).await;
        }
        Ok(())
    }

    /// Set one face's embedding slot and recompute the overall status.
    pub async fn update_face_slot(
        &self,
        entity_id: EntityId,
        index: usize,
        status: TaskStatus,
    ) -> Result<()> {
        let shard = self.locks.shard(entity_id);
        let _guard = shard.lock().await;

        let now = Utc::now();
        let updated = self
            .intelligence
            .atomic_update(
                entity_id,
                Box::new(move |record| {
                    let slots = &mut record.inference.face_embeddings;
                    if slots.len() <= index {
                        slots.resize(index + 1, TaskStatus::Pending);
                    }
                    slots[index] = status;
                    record.overall_status = aggregate(&record.inference);
                    record.touch(now);
                }),
            )
            .await?;

        if let Some(record) = updated {
            self.broadcast_record(&record).await;
        }
        Ok(())
    }

    /// Drop a stale active job without recording it in history. Used when
    /// the entity's content changed while the job was in flight.
    pub async fn discard_job(&self, entity_id: EntityId, job_id: &JobId) -> Result<()> {
        let shard = self.locks.shard(entity_id);
        let _guard = shard.lock().await;

        let now = Utc::now();
        let job_id_owned = job_id.clone();
        self.intelligence
            .atomic_update(
                entity_id,
                Box::new(move |record| {
                    if record.discard_job(&job_id_owned).is_some() {
                        record.touch(now);
                    }
                }),
            )
            .await?;
        Ok(())
    }

    async fn broadcast_record(&self, record: &IntelligenceRecord) {
        let payload = EntityStatusPayload {
            entity_id: record.entity_id,
            overall_status: record.overall_status,
            inference: record.inference.clone(),
            active_jobs: record.active_jobs.clone(),
            timestamp: record.last_updated,
        };
        if let Err(e) = self.broadcaster.publish_entity_status(payload).await {
            warn!(entity_id = %record.entity_id, "status broadcast failed: {e}");
        }
    }
}
