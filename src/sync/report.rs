use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// A file quarantined by the circuit breaker, or one that failed during
/// this pass.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub failure_count: u32,
    pub reason: String,
}

/// The structured result of one sync pass; the single source of truth
/// for what happened.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// old path -> new path
    pub moves: BTreeMap<String, String>,
    /// path -> checksum, for every file touched by this pass
    pub checksums: BTreeMap<String, String>,
    pub skipped_files: Vec<SkippedFile>,
    pub total: usize,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn total_changes(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len() + self.moves.len()
    }

    /// True when the pass found nothing to do (timing fields aside).
    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0 && self.skipped_files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_cover_all_change_kinds() {
        let mut report = SyncReport::default();
        report.new.insert("a.md".into());
        report.modified.insert("b.md".into());
        report.deleted.insert("c.md".into());
        report.moves.insert("d.md".into(), "e.md".into());
        assert_eq!(report.total_changes(), 4);
        assert!(!report.is_empty());
    }

    #[test]
    fn empty_report_serializes_cleanly() {
        let report = SyncReport::default();
        assert!(report.is_empty());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["total"], 0);
    }
}
