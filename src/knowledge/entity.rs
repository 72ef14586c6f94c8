//! Row types for the knowledge graph. Timestamps are UTC epoch seconds
//! so comparisons never depend on a session timezone.

use serde::Serialize;

/// The indexed representation of one file.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Entity {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub entity_type: String,
    pub content_type: String,
    /// POSIX-normalized, relative to the project root, case-sensitive.
    pub file_path: String,
    pub permalink: Option<String>,
    /// SHA-256 of the file bytes at last successful sync. `None` marks an
    /// in-progress or failed sync and is the primary recovery signal.
    pub checksum: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity {
    pub fn is_markdown(&self) -> bool {
        self.content_type == "text/markdown"
    }
}

/// A categorised bullet attached to an entity. Observations have no
/// identity stable across edits; they are fully rewritten on each sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub id: i64,
    pub entity_id: i64,
    pub content: String,
    pub category: Option<String>,
    pub context: Option<String>,
    pub tags: Vec<String>,
}

/// A directed, typed edge. `to_id = None` is a forward reference: the
/// target has not been indexed yet and the edge is re-resolved on later
/// syncs.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Relation {
    pub id: i64,
    pub from_id: i64,
    pub to_id: Option<i64>,
    /// The original link target string, kept verbatim.
    pub to_name: String,
    pub relation_type: String,
    pub context: Option<String>,
}

impl Relation {
    pub fn is_resolved(&self) -> bool {
        self.to_id.is_some()
    }
}

/// Entity attributes as computed from a file, before the row exists.
#[derive(Debug, Clone)]
pub struct EntityDraft {
    pub title: String,
    pub entity_type: String,
    pub content_type: String,
    pub file_path: String,
    pub permalink: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct ObservationDraft {
    pub content: String,
    pub category: Option<String>,
    pub context: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RelationDraft {
    pub relation_type: String,
    pub to_name: String,
    /// Resolved before application when the target already exists.
    pub to_id: Option<i64>,
    pub context: Option<String>,
}
