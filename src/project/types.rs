use std::path::PathBuf;

use serde::Serialize;

use crate::sync::SyncOptions;

/// The unit of sync: one directory plus its sidecar database row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub root: String,
    /// Unix millis of the last successful full sync.
    pub last_scan_timestamp: Option<i64>,
    /// File count observed by that sync; a mismatch invalidates the
    /// watermark.
    pub last_file_count: Option<i64>,
}

/// Everything a core call needs to know about the project it operates
/// on. Passed explicitly; there is no global state.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project_id: i64,
    pub root: PathBuf,
    pub options: SyncOptions,
}

impl ProjectContext {
    pub fn new(project_id: i64, root: PathBuf, options: SyncOptions) -> Self {
        ProjectContext {
            project_id,
            root,
            options,
        }
    }
}
