//! Engine configuration.
//!
//! Defaults mirror production: CLIP vectors are 512-wide, DINOv2-S vectors
//! 384-wide, and face matches below 0.7 cosine similarity are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{InsightError, Result};
use crate::retry::RetryConfig;

/// Configuration for the insight orchestration engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Root of the media file tree; collaborator paths are relative to it.
    pub media_storage_dir: PathBuf,

    /// Expected CLIP embedding dimensionality.
    pub clip_vector_size: usize,
    /// Expected DINOv2 embedding dimensionality.
    pub dino_vector_size: usize,
    /// Expected face embedding dimensionality.
    pub face_vector_size: usize,

    /// Minimum similarity score for a face match to count.
    pub face_match_threshold: f32,
    /// Maximum number of neighbors fetched per face match search.
    pub face_match_limit: usize,

    /// Delay before polling a freshly submitted job for fast completion.
    pub completion_probe_delay_ms: u64,

    /// Attempts when waiting for a concurrently processed sibling face to
    /// receive its person link.
    pub person_link_attempts: u32,
    /// Delay between person-link attempts.
    pub person_link_delay_ms: u64,

    /// Number of shards in the per-entity lock pool.
    pub lock_shards: usize,

    /// Interval between unprompted reconciliation passes of the worker.
    pub reconcile_interval_secs: u64,

    pub retry: RetryConfig,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            media_storage_dir: PathBuf::from("media"),
            clip_vector_size: 512,
            dino_vector_size: 384,
            face_vector_size: 512,
            face_match_threshold: 0.7,
            face_match_limit: 10,
            completion_probe_delay_ms: 50,
            person_link_attempts: 3,
            person_link_delay_ms: 1_000,
            lock_shards: 64,
            reconcile_interval_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl InsightConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| InsightError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Expected dimensionality for an embedding task's output vector.
    pub fn expected_vector_size(&self, task: colan_model::TaskKind) -> Option<usize> {
        use colan_model::TaskKind;
        match task {
            TaskKind::ClipEmbedding => Some(self.clip_vector_size),
            TaskKind::DinoEmbedding => Some(self.dino_vector_size),
            TaskKind::FaceEmbedding => Some(self.face_vector_size),
            TaskKind::FaceDetection | TaskKind::HlsStreaming => None,
        }
    }
}
