//! In-memory collaborator fakes and a wired-up engine harness.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use colan_core::ports::broadcast::{EntityStatusPayload, StatusBroadcaster};
use colan_core::ports::catalog::CatalogStore;
use colan_core::ports::changelog::{ChangeLogReader, WatermarkStore};
use colan_core::ports::compute::{
    ComputeJobClient, JobDetails, JobOutput, JobUpdate, SharedCompletionHandler,
};
use colan_core::ports::intelligence::{IntelligenceStore, RecordTransform};
use colan_core::ports::storage::DirStorage;
use colan_core::ports::vector::{StoredVector, VectorMatch, VectorPayload, VectorStore};
use colan_core::retry::RetryConfig;
use colan_core::{
    InsightConfig, InsightError, JobCallbackHandler, JobSubmissionService, MediaInsight,
    Result,
};
use colan_model::{
    EntityId, EntityKind, EntityRow, EntityVersion, Face, FaceId, FaceMatch,
    IntelligenceRecord, JobId, JobStatus, KnownPerson, PersonId, TaskKind, TransactionId,
};
use dashmap::DashMap;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Compute collaborator

#[derive(Default)]
pub struct FakeCompute {
    next_id: AtomicU64,
    fail_next_submit: AtomicBool,
    /// Tasks that should appear terminal the moment they are submitted,
    /// with the push notification never delivered. Exercises the
    /// fast-completion probe.
    auto_complete: Mutex<HashMap<TaskKind, JobOutput>>,
    jobs: DashMap<JobId, JobDetails>,
    hooks: DashMap<JobId, SharedCompletionHandler>,
    submissions: Mutex<Vec<(TaskKind, PathBuf)>>,
    embeddings: DashMap<String, Vec<f32>>,
}

impl FakeCompute {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_submit(&self) {
        self.fail_next_submit.store(true, Ordering::SeqCst);
    }

    pub fn auto_complete(&self, task: TaskKind, output: JobOutput) {
        self.auto_complete.lock().unwrap().insert(task, output);
    }

    pub fn set_embedding(&self, relative_path: &str, embedding: Vec<f32>) {
        self.embeddings.insert(relative_path.to_string(), embedding);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn submissions(&self) -> Vec<(TaskKind, PathBuf)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submitted_tasks(&self) -> Vec<TaskKind> {
        self.submissions.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    /// Mark a job terminal and deliver the push notification.
    pub async fn complete(&self, job_id: &JobId, output: JobOutput) {
        if let Some(mut details) = self.jobs.get_mut(job_id) {
            details.status = JobStatus::Completed;
            details.output = Some(output);
        }
        self.deliver(JobUpdate::completed(job_id.clone())).await;
    }

    pub async fn fail(&self, job_id: &JobId, error: &str) {
        if let Some(mut details) = self.jobs.get_mut(job_id) {
            details.status = JobStatus::Failed;
            details.error_message = Some(error.to_string());
        }
        self.deliver(JobUpdate::failed(job_id.clone(), error)).await;
    }

    pub async fn deliver(&self, update: JobUpdate) {
        let hook = self.hooks.get(&update.job_id).map(|h| h.value().clone());
        if let Some(hook) = hook {
            hook.on_update(update).await;
        }
    }
}

#[async_trait]
impl ComputeJobClient for FakeCompute {
    async fn submit(
        &self,
        task: TaskKind,
        input: &Path,
        on_complete: SharedCompletionHandler,
    ) -> Result<JobId> {
        if self.fail_next_submit.swap(false, Ordering::SeqCst) {
            return Err(InsightError::Compute("injected submit failure".into()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = JobId::new(format!("job-{n}"));
        self.submissions.lock().unwrap().push((task, input.to_path_buf()));

        let auto = self.auto_complete.lock().unwrap().get(&task).cloned();
        let details = match auto {
            Some(output) => JobDetails {
                job_id: job_id.clone(),
                status: JobStatus::Completed,
                error_message: None,
                output: Some(output),
            },
            None => JobDetails {
                job_id: job_id.clone(),
                status: JobStatus::Processing,
                error_message: None,
                output: None,
            },
        };
        self.jobs.insert(job_id.clone(), details);
        self.hooks.insert(job_id.clone(), on_complete);
        Ok(job_id)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<JobDetails>> {
        Ok(self.jobs.get(job_id).map(|d| d.value().clone()))
    }

    async fn download_job_file(
        &self,
        _job_id: &JobId,
        _relative_path: &str,
        dest: &Path,
    ) -> Result<()> {
        std::fs::write(dest, b"crop")?;
        Ok(())
    }

    async fn fetch_embedding(&self, _job_id: &JobId, relative_path: &str) -> Result<Vec<f32>> {
        self.embeddings
            .get(relative_path)
            .map(|e| e.value().clone())
            .ok_or_else(|| InsightError::NotFound(format!("embedding {relative_path}")))
    }
}

// ---------------------------------------------------------------------------
// Intelligence store

#[derive(Default)]
pub struct MemoryIntelligence {
    rows: DashMap<EntityId, IntelligenceRecord>,
}

impl MemoryIntelligence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl IntelligenceStore for MemoryIntelligence {
    async fn get(&self, entity_id: EntityId) -> Result<Option<IntelligenceRecord>> {
        Ok(self.rows.get(&entity_id).map(|r| r.value().clone()))
    }

    async fn put(&self, record: IntelligenceRecord) -> Result<()> {
        self.rows.insert(record.entity_id, record);
        Ok(())
    }

    async fn atomic_update(
        &self,
        entity_id: EntityId,
        transform: RecordTransform,
    ) -> Result<Option<IntelligenceRecord>> {
        match self.rows.get_mut(&entity_id) {
            Some(mut record) => {
                transform(&mut record);
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn atomic_upsert(
        &self,
        entity_id: EntityId,
        init: IntelligenceRecord,
        transform: RecordTransform,
    ) -> Result<IntelligenceRecord> {
        let mut record = self.rows.entry(entity_id).or_insert(init);
        transform(&mut record);
        Ok(record.clone())
    }

    async fn delete(&self, entity_id: EntityId) -> Result<()> {
        self.rows.remove(&entity_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vector store

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[derive(Default)]
pub struct MemoryVectorStore {
    points: DashMap<i64, StoredVector>,
}

impl MemoryVectorStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.points.contains_key(&id)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, id: i64, embedding: &[f32], payload: VectorPayload) -> Result<bool> {
        self.points.insert(
            id,
            StoredVector {
                id,
                embedding: embedding.to_vec(),
                payload,
            },
        );
        Ok(true)
    }

    async fn fetch(&self, id: i64) -> Result<Option<StoredVector>> {
        Ok(self.points.get(&id).map(|p| p.value().clone()))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.points.remove(&id);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        let mut hits: Vec<VectorMatch> = self
            .points
            .iter()
            .filter_map(|p| {
                let score = cosine(query, &p.embedding);
                (score >= score_threshold).then(|| VectorMatch {
                    id: p.id,
                    score,
                    payload: p.payload.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(limit);
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Catalog

pub struct MemoryCatalog {
    entities: DashMap<EntityId, EntityRow>,
    faces: DashMap<FaceId, Face>,
    persons: DashMap<PersonId, KnownPerson>,
    matches: Mutex<Vec<FaceMatch>>,
    next_person: AtomicI64,
}

impl MemoryCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entities: DashMap::new(),
            faces: DashMap::new(),
            persons: DashMap::new(),
            matches: Mutex::new(Vec::new()),
            // High floor keeps generated ids clear of hand-seeded ones.
            next_person: AtomicI64::new(100),
        })
    }

    pub fn put_entity(&self, row: EntityRow) {
        self.entities.insert(row.id, row);
    }

    pub fn put_face(&self, face: Face) {
        self.faces.insert(face.id, face);
    }

    pub fn put_person(&self, person: KnownPerson) {
        self.persons.insert(person.id, person);
    }

    pub fn face(&self, id: FaceId) -> Option<Face> {
        self.faces.get(&id).map(|f| f.value().clone())
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn person_count(&self) -> usize {
        self.persons.len()
    }

    pub fn recorded_matches(&self) -> Vec<FaceMatch> {
        self.matches.lock().unwrap().clone()
    }

    pub fn set_md5(&self, id: EntityId, md5: &str) {
        if let Some(mut row) = self.entities.get_mut(&id) {
            row.md5 = Some(md5.to_string());
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn fetch_entity(&self, id: EntityId) -> Result<Option<EntityRow>> {
        Ok(self.entities.get(&id).map(|e| e.value().clone()))
    }

    async fn fetch_face(&self, id: FaceId) -> Result<Option<Face>> {
        Ok(self.faces.get(&id).map(|f| f.value().clone()))
    }

    async fn upsert_face(&self, face: Face) -> Result<Face> {
        self.faces.insert(face.id, face.clone());
        Ok(face)
    }

    async fn link_face_to_person(&self, face: FaceId, person: PersonId) -> Result<()> {
        let mut row = self
            .faces
            .get_mut(&face)
            .ok_or_else(|| InsightError::NotFound(format!("face {face}")))?;
        row.known_person_id = Some(person);
        Ok(())
    }

    async fn create_person(&self) -> Result<KnownPerson> {
        let id = PersonId(self.next_person.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let person = KnownPerson {
            id,
            label: None,
            created_at: now,
            updated_at: now,
        };
        self.persons.insert(id, person.clone());
        Ok(person)
    }

    async fn record_face_match(&self, m: FaceMatch) -> Result<()> {
        self.matches.lock().unwrap().push(m);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Change log and watermark

#[derive(Default)]
pub struct MemoryChangeLog {
    versions: Mutex<Vec<EntityVersion>>,
}

impl MemoryChangeLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, version: EntityVersion) {
        self.versions.lock().unwrap().push(version);
    }
}

#[async_trait]
impl ChangeLogReader for MemoryChangeLog {
    async fn versions_after(&self, after: TransactionId) -> Result<Vec<EntityVersion>> {
        let mut out: Vec<EntityVersion> = self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.transaction_id > after)
            .cloned()
            .collect();
        out.sort_by_key(|v| v.transaction_id);
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryWatermark {
    value: Mutex<TransactionId>,
}

impl MemoryWatermark {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> TransactionId {
        *self.value.lock().unwrap()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermark {
    async fn load(&self) -> Result<TransactionId> {
        Ok(*self.value.lock().unwrap())
    }

    async fn store(&self, tx: TransactionId) -> Result<()> {
        *self.value.lock().unwrap() = tx;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broadcaster

#[derive(Default)]
pub struct CollectingBroadcaster {
    entity_events: Mutex<Vec<EntityStatusPayload>>,
    statuses: Mutex<Vec<String>>,
    ranges: Mutex<Vec<(TransactionId, TransactionId)>>,
    end_counts: Mutex<Vec<usize>>,
}

impl CollectingBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entity_events(&self) -> Vec<EntityStatusPayload> {
        self.entity_events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn ranges(&self) -> Vec<(TransactionId, TransactionId)> {
        self.ranges.lock().unwrap().clone()
    }

    pub fn end_counts(&self) -> Vec<usize> {
        self.end_counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusBroadcaster for CollectingBroadcaster {
    async fn publish_entity_status(&self, payload: EntityStatusPayload) -> Result<()> {
        self.entity_events.lock().unwrap().push(payload);
        Ok(())
    }

    async fn publish_start(
        &self,
        version_start: TransactionId,
        version_end: TransactionId,
    ) -> Result<()> {
        self.ranges.lock().unwrap().push((version_start, version_end));
        Ok(())
    }

    async fn publish_end(&self, processed_count: usize) -> Result<()> {
        self.end_counts.lock().unwrap().push(processed_count);
        Ok(())
    }

    async fn publish_status(&self, status: &str) -> Result<()> {
        self.statuses.lock().unwrap().push(status.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct Harness {
    pub config: Arc<InsightConfig>,
    pub compute: Arc<FakeCompute>,
    pub catalog: Arc<MemoryCatalog>,
    pub intelligence: Arc<MemoryIntelligence>,
    pub clip_vectors: Arc<MemoryVectorStore>,
    pub dino_vectors: Arc<MemoryVectorStore>,
    pub face_vectors: Arc<MemoryVectorStore>,
    pub broadcaster: Arc<CollectingBroadcaster>,
    pub changelog: Arc<MemoryChangeLog>,
    pub watermark: Arc<MemoryWatermark>,
    pub submission: Arc<JobSubmissionService>,
    pub callbacks: Arc<JobCallbackHandler>,
    pub insight: Arc<MediaInsight>,
    storage_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let storage_dir = TempDir::new().expect("tempdir");
        let config = Arc::new(InsightConfig {
            media_storage_dir: storage_dir.path().to_path_buf(),
            completion_probe_delay_ms: 10,
            person_link_attempts: 2,
            person_link_delay_ms: 5,
            retry: RetryConfig {
                max_attempts: 2,
                backoff_base_ms: 1,
                backoff_max_ms: 2,
            },
            ..InsightConfig::default()
        });

        let compute = FakeCompute::new();
        let catalog = MemoryCatalog::new();
        let intelligence = MemoryIntelligence::new();
        let clip_vectors = MemoryVectorStore::new();
        let dino_vectors = MemoryVectorStore::new();
        let face_vectors = MemoryVectorStore::new();
        let broadcaster = CollectingBroadcaster::new();
        let changelog = MemoryChangeLog::new();
        let watermark = MemoryWatermark::new();
        let storage = Arc::new(DirStorage::new(storage_dir.path()));

        let submission = Arc::new(JobSubmissionService::new(
            Arc::clone(&config),
            compute.clone(),
            intelligence.clone(),
            storage.clone(),
            broadcaster.clone(),
        ));
        let callbacks = JobCallbackHandler::new(
            Arc::clone(&config),
            compute.clone(),
            catalog.clone(),
            storage,
            clip_vectors.clone(),
            dino_vectors.clone(),
            face_vectors.clone(),
            Arc::clone(&submission),
        );
        let insight = Arc::new(MediaInsight::new(
            changelog.clone(),
            watermark.clone(),
            intelligence.clone(),
            Arc::clone(&submission),
            Arc::clone(&callbacks),
            broadcaster.clone(),
        ));

        Self {
            config,
            compute,
            catalog,
            intelligence,
            clip_vectors,
            dino_vectors,
            face_vectors,
            broadcaster,
            changelog,
            watermark,
            submission,
            callbacks,
            insight,
            storage_dir,
        }
    }

    pub fn storage_root(&self) -> &Path {
        self.storage_dir.path()
    }

    pub fn write_media(&self, relative: &str) {
        let path = self.storage_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("media dir");
        }
        std::fs::write(path, b"media").expect("media file");
    }

    /// Register an image entity in the catalog and write its file.
    pub fn image_entity(&self, id: i64, md5: &str, relative: &str) -> EntityRow {
        self.write_media(relative);
        let row = EntityRow {
            id: EntityId(id),
            kind: EntityKind::Image,
            md5: Some(md5.to_string()),
            file_path: Some(relative.to_string()),
            is_deleted: false,
            create_date: Some(Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap()),
        };
        self.catalog.put_entity(row.clone());
        row
    }

    pub fn version(&self, id: i64, tx: u64, md5: &str, relative: &str) -> EntityVersion {
        EntityVersion {
            id: EntityId(id),
            transaction_id: TransactionId(tx),
            kind: EntityKind::Image,
            md5: Some(md5.to_string()),
            file_path: Some(relative.to_string()),
            is_deleted: false,
            create_date: Some(Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap()),
        }
    }

    pub async fn record(&self, id: i64) -> IntelligenceRecord {
        self.intelligence
            .get(EntityId(id))
            .await
            .unwrap()
            .expect("intelligence record")
    }

    /// Unit vector along one axis, for controllable cosine similarity.
    pub fn basis(&self, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; self.config.face_vector_size];
        v[axis] = 1.0;
        v
    }
}
