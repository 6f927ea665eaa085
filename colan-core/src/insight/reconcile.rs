//! Reconciliation: turn change-log deltas into job submissions.
//!
//! Each pass reads everything past the persisted watermark, coalesces to
//! the newest version per entity, triggers the task set for qualifying
//! images, and only then advances the watermark. A crash mid-batch leaves
//! the watermark behind, so the same range is replayed on restart; the
//! skip logic and deterministic artifact ids absorb the duplicates.

use std::collections::HashMap;
use std::sync::Arc;

use colan_model::{EntityId, EntityVersion, TaskKind};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::insight::callbacks::JobCallbackHandler;
use crate::insight::submission::{JobSubmissionService, SubmitRequest};
use crate::ports::broadcast::StatusBroadcaster;
use crate::ports::changelog::{ChangeLogReader, WatermarkStore};
use crate::ports::intelligence::IntelligenceStore;

/// Task set triggered for every qualifying image version.
const IMAGE_TASKS: [TaskKind; 3] = [
    TaskKind::FaceDetection,
    TaskKind::ClipEmbedding,
    TaskKind::DinoEmbedding,
];

pub struct MediaInsight {
    changelog: Arc<dyn ChangeLogReader>,
    watermark: Arc<dyn WatermarkStore>,
    intelligence: Arc<dyn IntelligenceStore>,
    submission: Arc<JobSubmissionService>,
    callbacks: Arc<JobCallbackHandler>,
    broadcaster: Arc<dyn StatusBroadcaster>,
}

impl std::fmt::Debug for MediaInsight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaInsight").finish_non_exhaustive()
    }
}

impl MediaInsight {
    pub fn new(
        changelog: Arc<dyn ChangeLogReader>,
        watermark: Arc<dyn WatermarkStore>,
        intelligence: Arc<dyn IntelligenceStore>,
        submission: Arc<JobSubmissionService>,
        callbacks: Arc<JobCallbackHandler>,
        broadcaster: Arc<dyn StatusBroadcaster>,
    ) -> Self {
        Self {
            changelog,
            watermark,
            intelligence,
            submission,
            callbacks,
            broadcaster,
        }
    }

    /// Run one reconciliation pass. Returns the number of entities for
    /// which jobs were triggered.
    ///
    /// Per-entity failures are logged and skipped; only watermark and
    /// change-log access errors abort the pass.
    pub async fn run_once(&self) -> Result<usize> {
        let watermark = self.watermark.load().await?;
        let versions = self.changelog.versions_after(watermark).await?;
        if versions.is_empty() {
            debug!(watermark = %watermark, "nothing to reconcile");
            return Ok(0);
        }

        let max_tx = versions
            .iter()
            .map(|v| v.transaction_id)
            .max()
            .unwrap_or(watermark);
        let coalesced = coalesce(versions);

        info!(
            from = %watermark,
            to = %max_tx,
            entities = coalesced.len(),
            "reconciliation pass started"
        );
        if let Err(e) = self.broadcaster.publish_start(watermark, max_tx).await {
            warn!("start broadcast failed: {e}");
        }

        let mut processed = 0usize;
        for version in coalesced {
            if version.is_deleted {
                // Derived rows cascade with the entity; only the
                // intelligence blob is ours to clean up.
                if let Err(e) = self.intelligence.delete(version.id).await {
                    warn!(entity_id = %version.id, "record cleanup failed: {e}");
                }
                continue;
            }
            match self.qualify(&version).await {
                Ok(true) => {
                    self.enqueue_image(&version).await;
                    processed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(entity_id = %version.id, "qualification failed: {e}");
                }
            }
        }

        // Advance only after the batch has been attempted, success or not.
        self.watermark.store(max_tx).await?;

        if let Err(e) = self.broadcaster.publish_end(processed).await {
            warn!("end broadcast failed: {e}");
        }
        info!(processed, watermark = %max_tx, "reconciliation pass finished");
        Ok(processed)
    }

    async fn qualify(&self, version: &EntityVersion) -> Result<bool> {
        if !version.has_image_content() {
            return Ok(false);
        }
        if version.file_path.is_none() {
            warn!(entity_id = %version.id, "image version without a file path, skipping");
            return Ok(false);
        }

        // Skip content we already have an in-flight or finished cycle for.
        if let Some(record) = self.intelligence.get(version.id).await? {
            if version.md5.as_deref() == Some(record.active_processing_md5.as_str()) {
                debug!(entity_id = %version.id, "content already being processed, skipping");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Trigger the full image task set for one version. Submission
    /// failures are reported through status fields, never here.
    async fn enqueue_image(&self, version: &EntityVersion) {
        let md5 = version.md5.clone().unwrap_or_default();
        let relative_path = version.file_path.clone().unwrap_or_default();

        for task in IMAGE_TASKS {
            let outcome = self
                .submission
                .submit(
                    SubmitRequest {
                        entity_id: version.id,
                        task,
                        md5: md5.clone(),
                        relative_path: relative_path.clone(),
                        face_index: None,
                    },
                    self.callbacks.completion_hook(version.id, task, None),
                )
                .await;
            debug!(entity_id = %version.id, task = %task, "trigger outcome: {outcome:?}");
        }
    }
}

/// Keep only the newest version per entity, ordered by transaction id so
/// replays are deterministic.
fn coalesce(versions: Vec<EntityVersion>) -> Vec<EntityVersion> {
    let mut newest: HashMap<EntityId, EntityVersion> = HashMap::new();
    for version in versions {
        match newest.get(&version.id) {
            Some(existing) if existing.transaction_id >= version.transaction_id => {}
            _ => {
                newest.insert(version.id, version);
            }
        }
    }
    let mut out: Vec<EntityVersion> = newest.into_values().collect();
    out.sort_by_key(|v| v.transaction_id);
    out
}
