use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, TransactionId};

/// Classification of a catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Image,
    Video,
    Collection,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Image => "image",
            EntityKind::Video => "video",
            EntityKind::Collection => "collection",
        };
        f.write_str(s)
    }
}

/// Read-only snapshot of an entity's fields at one change-log transaction.
///
/// For a fixed entity id, `transaction_id` values are strictly increasing
/// across versions; the log never rewrites history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVersion {
    pub id: EntityId,
    pub transaction_id: TransactionId,
    pub kind: EntityKind,
    /// Content hash of the file at this version, when known.
    pub md5: Option<String>,
    /// Storage-relative path of the media file.
    pub file_path: Option<String>,
    /// Soft deletion creates a version with this flag set.
    pub is_deleted: bool,
    /// Capture timestamp, used to lay out derived artifacts by date.
    pub create_date: Option<DateTime<Utc>>,
}

impl EntityVersion {
    /// Whether this version carries processable image content.
    pub fn has_image_content(&self) -> bool {
        self.kind == EntityKind::Image
            && !self.is_deleted
            && self.md5.as_deref().is_some_and(|m| !m.is_empty())
    }
}

/// Current state of an entity as read back from the catalog, used by the
/// callback handler to detect deletions and content changes mid-flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: EntityId,
    pub kind: EntityKind,
    pub md5: Option<String>,
    pub file_path: Option<String>,
    pub is_deleted: bool,
    pub create_date: Option<DateTime<Utc>>,
}
