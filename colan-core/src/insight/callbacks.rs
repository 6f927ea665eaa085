//! Completion handling: download results, persist derived artifacts,
//! feed per-task status signals back into the submission service.
//!
//! The handler never touches `overall_status` itself. Every outcome is
//! reported through `update_job_status` / `update_face_slot`, and the
//! submission service recomputes the aggregate.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use colan_model::{
    EntityId, EntityRow, Face, FaceId, FaceMatch, JobId, JobStatus, PersonId, TaskKind,
    TaskStatus,
};
use futures::future::join_all;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::InsightConfig;
use crate::insight::submission::{JobSubmissionService, SubmitRequest};
use crate::ports::catalog::CatalogStore;
use crate::ports::compute::{
    ComputeJobClient, DetectedFace, JobCompletionHandler, JobOutput, JobUpdate,
    SharedCompletionHandler,
};
use crate::ports::storage::StorageResolver;
use crate::ports::vector::{VectorPayload, VectorStore};
use crate::retry::RetryPolicy;

/// Storage-relative path for a face crop, laid out by capture date.
fn face_crop_path(entity_id: EntityId, date: DateTime<Utc>, index: usize) -> String {
    format!(
        "faces/{:04}/{:02}/{:02}/{}_face_{}.png",
        date.year(),
        date.month(),
        date.day(),
        entity_id,
        index
    )
}

/// Completion hook bound to one submission: remembers which entity, task
/// and (for per-face jobs) slot the update belongs to, since the push
/// payload itself carries only the job id and status.
struct CompletionCtx {
    handler: Weak<JobCallbackHandler>,
    entity_id: EntityId,
    task: TaskKind,
    face_index: Option<usize>,
}

#[async_trait]
impl JobCompletionHandler for CompletionCtx {
    async fn on_update(&self, update: JobUpdate) {
        let Some(handler) = self.handler.upgrade() else {
            warn!(job_id = %update.job_id, "completion delivered after handler shutdown");
            return;
        };
        handler
            .handle(self.entity_id, self.task, self.face_index, update)
            .await;
    }
}

pub struct JobCallbackHandler {
    this: Weak<Self>,
    config: Arc<InsightConfig>,
    compute: Arc<dyn ComputeJobClient>,
    catalog: Arc<dyn CatalogStore>,
    storage: Arc<dyn StorageResolver>,
    clip_vectors: Arc<dyn VectorStore>,
    dino_vectors: Arc<dyn VectorStore>,
    face_vectors: Arc<dyn VectorStore>,
    submission: Arc<JobSubmissionService>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for JobCallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCallbackHandler").finish_non_exhaustive()
    }
}

impl JobCallbackHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<InsightConfig>,
        compute: Arc<dyn ComputeJobClient>,
        catalog: Arc<dyn CatalogStore>,
        storage: Arc<dyn StorageResolver>,
        clip_vectors: Arc<dyn VectorStore>,
        dino_vectors: Arc<dyn VectorStore>,
        face_vectors: Arc<dyn VectorStore>,
        submission: Arc<JobSubmissionService>,
    ) -> Arc<Self> {
        let retry = RetryPolicy::new(config.retry);
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            compute,
            catalog,
            storage,
            clip_vectors,
            dino_vectors,
            face_vectors,
            submission,
            retry,
        })
    }

    /// Build a completion hook for a submission of `task` on `entity_id`.
    pub fn completion_hook(
        &self,
        entity_id: EntityId,
        task: TaskKind,
        face_index: Option<usize>,
    ) -> SharedCompletionHandler {
        Arc::new(CompletionCtx {
            handler: self.this.clone(),
            entity_id,
            task,
            face_index,
        })
    }

    /// Process one job update. Failures are logged and reflected in status
    /// fields; nothing propagates to the delivery mechanism.
    pub async fn handle(
        &self,
        entity_id: EntityId,
        task: TaskKind,
        face_index: Option<usize>,
        update: JobUpdate,
    ) {
        if !update.status.is_terminal() {
            if let Some(progress) = update.progress {
                if let Err(e) = self
                    .submission
                    .update_job_progress(entity_id, &update.job_id, progress)
                    .await
                {
                    warn!(entity_id = %entity_id, job_id = %update.job_id, "progress update failed: {e}");
                }
            }
            return;
        }

        let Some(entity) = self.verify_job_safety(entity_id, &update.job_id).await else {
            return;
        };

        if update.status == JobStatus::Failed {
            let message = update
                .error_message
                .unwrap_or_else(|| "job failed without error message".to_string());
            warn!(entity_id = %entity_id, job_id = %update.job_id, task = %task, "job failed: {message}");
            self.fail_job(entity_id, &update.job_id, face_index, message).await;
            return;
        }

        let details = match self.compute.get_job(&update.job_id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                error!(job_id = %update.job_id, "completed job vanished from collaborator");
                self.fail_job(entity_id, &update.job_id, face_index, "job record missing".into())
                    .await;
                return;
            }
            Err(e) => {
                error!(job_id = %update.job_id, "job fetch failed: {e}");
                self.fail_job(entity_id, &update.job_id, face_index, format!("job fetch failed: {e}"))
                    .await;
                return;
            }
        };

        let Some(output) = details.output else {
            error!(job_id = %update.job_id, task = %task, "completed job has no output");
            self.fail_job(entity_id, &update.job_id, face_index, "job output missing".into())
                .await;
            return;
        };

        match (task, output) {
            (TaskKind::FaceDetection, JobOutput::FaceDetection { faces }) => {
                self.handle_face_detection(&entity, &update.job_id, faces).await;
            }
            (TaskKind::ClipEmbedding | TaskKind::DinoEmbedding, JobOutput::EmbeddingFile { path }) => {
                self.handle_entity_embedding(&entity, &update.job_id, task, &path).await;
            }
            (TaskKind::FaceEmbedding, JobOutput::EmbeddingFile { path }) => {
                let Some(index) = face_index else {
                    error!(job_id = %update.job_id, "face embedding completion without a slot index");
                    return;
                };
                self.handle_face_embedding(&entity, &update.job_id, index, &path).await;
            }
            (TaskKind::HlsStreaming, JobOutput::HlsManifest { manifest_path }) => {
                debug!(entity_id = %entity_id, manifest = %manifest_path, "hls manifest ready");
                self.complete_job(entity_id, &update.job_id).await;
            }
            (task, output) => {
                error!(
                    job_id = %update.job_id,
                    task = %task,
                    "output shape does not match task: {output:?}"
                );
                self.fail_job(entity_id, &update.job_id, face_index, "unexpected output shape".into())
                    .await;
            }
        }
    }

    /// Re-check that acting on this job is still valid. Returns the
    /// current entity row, or `None` when the result must be discarded
    /// (entity gone, stale job id, or content changed mid-flight).
    async fn verify_job_safety(&self, entity_id: EntityId, job_id: &JobId) -> Option<EntityRow> {
        let entity = match self.catalog.fetch_entity(entity_id).await {
            Ok(Some(entity)) if !entity.is_deleted => entity,
            Ok(_) => {
                warn!(entity_id = %entity_id, job_id = %job_id, "entity deleted, discarding result");
                return None;
            }
            Err(e) => {
                error!(entity_id = %entity_id, "entity fetch failed: {e}");
                return None;
            }
        };

        let record = match self.submission.record(entity_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(entity_id = %entity_id, job_id = %job_id, "no intelligence record, discarding result");
                return None;
            }
            Err(e) => {
                error!(entity_id = %entity_id, "record fetch failed: {e}");
                return None;
            }
        };

        if record.active_job(job_id).is_none() {
            warn!(entity_id = %entity_id, job_id = %job_id, "job no longer active, discarding result");
            return None;
        }

        if entity.md5.as_deref() != Some(record.active_processing_md5.as_str()) {
            warn!(
                entity_id = %entity_id,
                job_id = %job_id,
                "content changed while job was in flight, discarding result"
            );
            if let Err(e) = self.submission.discard_job(entity_id, job_id).await {
                error!(entity_id = %entity_id, job_id = %job_id, "stale job cleanup failed: {e}");
            }
            return None;
        }

        Some(entity)
    }

    async fn handle_face_detection(
        &self,
        entity: &EntityRow,
        job_id: &JobId,
        faces: Vec<DetectedFace>,
    ) {
        let date = entity.create_date.unwrap_or_else(Utc::now);
        let mut persisted: Vec<(usize, Face)> = Vec::with_capacity(faces.len());
        let mut failed_slots: Vec<usize> = Vec::new();

        let results = join_all(faces.iter().enumerate().map(|(index, detected)| async move {
            (index, self.persist_face(entity, job_id, date, index, detected).await)
        }))
        .await;
        for (index, result) in results {
            match result {
                Ok(face) => persisted.push((index, face)),
                Err(e) => {
                    // One bad face must not sink its siblings.
                    error!(
                        entity_id = %entity.id,
                        face_index = index,
                        "face persistence failed: {e}"
                    );
                    failed_slots.push(index);
                }
            }
        }

        info!(
            entity_id = %entity.id,
            total = faces.len(),
            persisted = persisted.len(),
            "face detection completed"
        );

        if let Err(e) = self.submission.begin_face_embeddings(entity.id, faces.len()).await {
            error!(entity_id = %entity.id, "face slot initialization failed: {e}");
        }
        for index in failed_slots {
            if let Err(e) = self
                .submission
                .update_face_slot(entity.id, index, TaskStatus::Failed)
                .await
            {
                error!(entity_id = %entity.id, face_index = index, "slot update failed: {e}");
            }
        }

        self.complete_job(entity.id, job_id).await;

        let md5 = entity.md5.clone().unwrap_or_default();
        for (index, face) in persisted {
            let outcome = self
                .submission
                .submit(
                    SubmitRequest {
                        entity_id: entity.id,
                        task: TaskKind::FaceEmbedding,
                        md5: md5.clone(),
                        relative_path: face.file_path.clone(),
                        face_index: Some(index),
                    },
                    self.completion_hook(entity.id, TaskKind::FaceEmbedding, Some(index)),
                )
                .await;
            debug!(
                entity_id = %entity.id,
                face_index = index,
                "face embedding submission: {outcome:?}"
            );
        }
    }

    async fn persist_face(
        &self,
        entity: &EntityRow,
        job_id: &JobId,
        date: DateTime<Utc>,
        index: usize,
        detected: &DetectedFace,
    ) -> crate::Result<Face> {
        let face_id = FaceId::derive(entity.id, index)
            .map_err(|e| crate::InsightError::InvalidOutput(e.to_string()))?;
        let crop_path = face_crop_path(entity.id, date, index);
        let dest = self.storage.absolute_path(&crop_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.compute
            .download_job_file(job_id, &detected.file_path, &dest)
            .await?;

        let face = Face {
            id: face_id,
            entity_id: entity.id,
            bbox: detected.bbox,
            confidence: detected.confidence,
            landmarks: detected.landmarks,
            file_path: crop_path,
            known_person_id: None,
            created_at: Utc::now(),
        };
        self.retry
            .run("persist face", || self.catalog.upsert_face(face.clone()))
            .await
    }

    async fn handle_entity_embedding(
        &self,
        entity: &EntityRow,
        job_id: &JobId,
        task: TaskKind,
        path: &str,
    ) {
        let embedding = match self.fetch_validated_embedding(job_id, task, path).await {
            Ok(embedding) => embedding,
            Err(message) => {
                self.fail_job(entity.id, job_id, None, message).await;
                return;
            }
        };

        let store = match task {
            TaskKind::ClipEmbedding => &self.clip_vectors,
            _ => &self.dino_vectors,
        };
        let payload = VectorPayload::for_entity(entity.id);
        let stored = self
            .retry
            .run("store embedding", || {
                store.upsert(entity.id.as_i64(), &embedding, payload.clone())
            })
            .await;

        match stored {
            Ok(true) => {
                info!(entity_id = %entity.id, task = %task, "embedding stored");
                self.complete_job(entity.id, job_id).await;
            }
            Ok(false) => {
                error!(entity_id = %entity.id, task = %task, "vector store rejected embedding");
                self.fail_job(entity.id, job_id, None, "vector store rejected embedding".into())
                    .await;
            }
            Err(e) => {
                error!(entity_id = %entity.id, task = %task, "embedding store failed: {e}");
                self.fail_job(entity.id, job_id, None, format!("embedding store failed: {e}"))
                    .await;
            }
        }
    }

    async fn handle_face_embedding(
        &self,
        entity: &EntityRow,
        job_id: &JobId,
        index: usize,
        path: &str,
    ) {
        let embedding = match self
            .fetch_validated_embedding(job_id, TaskKind::FaceEmbedding, path)
            .await
        {
            Ok(embedding) => embedding,
            Err(message) => {
                self.fail_job(entity.id, job_id, Some(index), message).await;
                return;
            }
        };

        let face_id = match FaceId::derive(entity.id, index) {
            Ok(face_id) => face_id,
            Err(e) => {
                self.fail_job(entity.id, job_id, Some(index), e.to_string()).await;
                return;
            }
        };

        let person = match self.resolve_person(face_id, &embedding).await {
            Ok(person) => person,
            Err(e) => {
                error!(face_id = %face_id, "identity resolution failed: {e}");
                self.fail_job(entity.id, job_id, Some(index), format!("identity resolution failed: {e}"))
                    .await;
                return;
            }
        };

        if let Err(e) = self.catalog.link_face_to_person(face_id, person).await {
            error!(face_id = %face_id, person_id = %person, "person link failed: {e}");
            self.fail_job(entity.id, job_id, Some(index), format!("person link failed: {e}"))
                .await;
            return;
        }

        let payload = VectorPayload::for_face(entity.id, face_id, Some(person));
        let stored = self
            .retry
            .run("store face embedding", || {
                self.face_vectors.upsert(face_id.as_i64(), &embedding, payload.clone())
            })
            .await;
        if let Err(e) = stored {
            error!(face_id = %face_id, "face vector store failed: {e}");
            self.fail_job(entity.id, job_id, Some(index), format!("face vector store failed: {e}"))
                .await;
            return;
        }

        info!(face_id = %face_id, person_id = %person, "face linked");
        if let Err(e) = self
            .submission
            .update_face_slot(entity.id, index, TaskStatus::Completed)
            .await
        {
            error!(entity_id = %entity.id, face_index = index, "slot update failed: {e}");
        }
        self.complete_job(entity.id, job_id).await;
    }

    /// Pick the identity for a new face from its nearest neighbors, or
    /// mint a fresh one.
    ///
    /// Every above-threshold hit whose face still exists is recorded for
    /// audit; the best surviving hit decides the person. A sibling face
    /// from the same batch may still be waiting for its own link, so an
    /// unlinked best match is re-read a few times before giving up and
    /// minting a new person for this face alone.
    async fn resolve_person(&self, face_id: FaceId, embedding: &[f32]) -> crate::Result<PersonId> {
        let matches = self
            .face_vectors
            .search(
                embedding,
                self.config.face_match_limit,
                self.config.face_match_threshold,
            )
            .await?;

        let now = Utc::now();
        let mut best_match: Option<Face> = None;
        let mut person: Option<PersonId> = None;

        for hit in &matches {
            let matched_id = FaceId(hit.id);
            if matched_id == face_id {
                continue;
            }
            let matched = match self.catalog.fetch_face(matched_id).await {
                Ok(Some(matched)) => matched,
                Ok(None) => {
                    warn!(matched_id = %matched_id, "vector hit without catalog row, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(matched_id = %matched_id, "matched face fetch failed: {e}");
                    continue;
                }
            };

            if let Err(e) = self
                .catalog
                .record_face_match(FaceMatch {
                    face_id,
                    matched_face_id: matched_id,
                    similarity_score: hit.score,
                    created_at: now,
                })
                .await
            {
                warn!(face_id = %face_id, matched_id = %matched_id, "match audit failed: {e}");
            }

            if person.is_none() {
                person = matched.known_person_id;
            }
            if best_match.is_none() {
                best_match = Some(matched);
            }
        }

        if let Some(person) = person {
            return Ok(person);
        }

        // The best match may be a sibling whose own link is still in
        // flight; give it a moment before deciding it is a new person.
        if let Some(matched) = &best_match {
            for _ in 0..self.config.person_link_attempts {
                sleep(Duration::from_millis(self.config.person_link_delay_ms)).await;
                if let Ok(Some(refetched)) = self.catalog.fetch_face(matched.id).await {
                    if let Some(person) = refetched.known_person_id {
                        return Ok(person);
                    }
                }
            }
        }

        // Only this face is assigned; the matched face keeps whatever
        // identity its own callback eventually settles on.
        let person = self.catalog.create_person().await?;
        Ok(person.id)
    }

    async fn fetch_validated_embedding(
        &self,
        job_id: &JobId,
        task: TaskKind,
        path: &str,
    ) -> std::result::Result<Vec<f32>, String> {
        let embedding = self
            .compute
            .fetch_embedding(job_id, path)
            .await
            .map_err(|e| format!("embedding fetch failed: {e}"))?;

        let expected = self.config.expected_vector_size(task).unwrap_or(embedding.len());
        if embedding.len() != expected {
            return Err(format!(
                "embedding dimension {} does not match expected {expected}",
                embedding.len()
            ));
        }
        Ok(embedding)
    }

    async fn complete_job(&self, entity_id: EntityId, job_id: &JobId) {
        if let Err(e) = self
            .submission
            .update_job_status(entity_id, job_id, JobStatus::Completed, None)
            .await
        {
            error!(entity_id = %entity_id, job_id = %job_id, "completion bookkeeping failed: {e}");
        }
    }

    async fn fail_job(
        &self,
        entity_id: EntityId,
        job_id: &JobId,
        face_index: Option<usize>,
        message: String,
    ) {
        if let Some(index) = face_index {
            if let Err(e) = self
                .submission
                .update_face_slot(entity_id, index, TaskStatus::Failed)
                .await
            {
                error!(entity_id = %entity_id, face_index = index, "slot update failed: {e}");
            }
        }
        if let Err(e) = self
            .submission
            .update_job_status(entity_id, job_id, JobStatus::Failed, Some(message))
            .await
        {
            error!(entity_id = %entity_id, job_id = %job_id, "failure bookkeeping failed: {e}");
        }
    }
}
