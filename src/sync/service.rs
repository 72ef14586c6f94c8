//! The sync orchestrator: change-set construction, ordered application,
//! forward-reference resolution, circuit breaker, and watermark.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::files::{FileStat, FileStore, FileWalker, ScanEntry};
use crate::knowledge::entity::{Entity, EntityDraft, ObservationDraft, RelationDraft};
use crate::knowledge::entity_repository::EntityStore;
use crate::knowledge::link_resolver::LinkResolver;
use crate::knowledge::permalink::permalink_from_path;
use crate::markdown::{frontmatter, EntityParser};
use crate::project::{ProjectContext, ProjectRepository};
use crate::search::SearchIndex;

use super::report::{SkippedFile, SyncReport};

/// An unresolved-relation backlog above this forces a full scan so the
/// resolution sweep sees every candidate target.
const RESOLUTION_BACKLOG_FULL_SCAN: i64 = 100;

/// Documents above this size are parsed on the blocking pool.
const BLOCKING_PARSE_THRESHOLD: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// When true, moving a file regenerates its permalink from the new
    /// path and rewrites frontmatter; otherwise the permalink survives
    /// the move.
    pub update_permalinks_on_move: bool,
    /// Safety margin subtracted from the watermark timestamp.
    pub watermark_epsilon_ms: i64,
    /// Consecutive failures before a file is quarantined.
    pub circuit_breaker_threshold: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            update_permalinks_on_move: false,
            watermark_epsilon_ms: 500,
            circuit_breaker_threshold: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct FailureEntry {
    count: u32,
    last_checksum: String,
    reason: String,
}

#[derive(Debug)]
struct ScannedFile {
    checksum: String,
    stat: FileStat,
}

#[derive(Debug, Default)]
struct ChangeSet {
    new: BTreeSet<String>,
    modified: BTreeSet<String>,
    deleted: BTreeSet<String>,
    /// old path -> new path
    moves: Vec<(String, String)>,
    disk: HashMap<String, ScannedFile>,
}

pub struct SyncService {
    ctx: ProjectContext,
    files: Arc<dyn FileStore>,
    entities: Arc<dyn EntityStore>,
    search: Arc<dyn SearchIndex>,
    resolver: Arc<dyn LinkResolver>,
    projects: ProjectRepository,
    walker: FileWalker,
    parser: EntityParser,
    /// file_path -> consecutive failures, keyed by content checksum
    breaker: tokio::sync::Mutex<HashMap<String, FailureEntry>>,
    /// at most one sync in flight per project
    sync_lock: tokio::sync::Mutex<()>,
}

impl SyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: ProjectContext,
        files: Arc<dyn FileStore>,
        entities: Arc<dyn EntityStore>,
        search: Arc<dyn SearchIndex>,
        resolver: Arc<dyn LinkResolver>,
        projects: ProjectRepository,
        walker: FileWalker,
    ) -> Self {
        SyncService {
            ctx,
            files,
            entities,
            search,
            resolver,
            projects,
            walker,
            parser: EntityParser::new(),
            breaker: tokio::sync::Mutex::new(HashMap::new()),
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    /// Run one sync pass and return what changed. Concurrent callers on
    /// the same project queue behind the in-flight pass.
    pub async fn sync(&self, force_full: bool) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        let started = Instant::now();

        let project = self
            .projects
            .get(self.ctx.project_id)
            .await?
            .ok_or_else(|| CoreError::fatal("project row no longer exists"))?;

        tokio::fs::metadata(&self.ctx.root)
            .await
            .map_err(|e| CoreError::fatal(format!("cannot enumerate project root: {e}")))?;

        let unresolved = self.entities.count_unresolved_relations().await?;

        let mut watermark_ms = None;
        if !force_full && unresolved <= RESOLUTION_BACKLOG_FULL_SCAN {
            if let Some(ts) = project.last_scan_timestamp {
                watermark_ms = Some(ts - self.ctx.options.watermark_epsilon_ms);
            }
        }

        let (mut disk, mut files_seen) = self.collect_scan(watermark_ms).await?;

        // a file added or removed with an old mtime is invisible to a
        // watermark scan; a count mismatch is the tell
        if watermark_ms.is_some() && Some(files_seen) != project.last_file_count {
            debug!(
                files_seen,
                expected = ?project.last_file_count,
                "file count discrepancy; falling back to full scan"
            );
            watermark_ms = None;
            (disk, files_seen) = self.collect_scan(None).await?;
        }
        let full_scan = watermark_ms.is_none();

        let changes = self.build_change_set(disk, full_scan).await?;
        debug!(
            new = changes.new.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            moves = changes.moves.len(),
            full_scan,
            "change set built"
        );

        let mut report = SyncReport::default();

        // 1. moves
        for (old, new) in &changes.moves {
            match self.handle_move(old, new).await {
                Ok(()) => {
                    if let Some(scanned) = changes.disk.get(new) {
                        report.checksums.insert(new.clone(), scanned.checksum.clone());
                    }
                    report.moves.insert(old.clone(), new.clone());
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(%old, %new, %err, "move failed; will retry on next full scan"),
            }
        }

        // 2. deletions
        for path in &changes.deleted {
            match self.handle_delete(path).await {
                Ok(()) => {
                    report.deleted.insert(path.clone());
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(%path, %err, "delete failed"),
            }
        }

        // 3. new and modified
        let threshold = self.ctx.options.circuit_breaker_threshold;
        let pending: Vec<(String, bool)> = changes
            .new
            .iter()
            .map(|p| (p.clone(), true))
            .chain(changes.modified.iter().map(|p| (p.clone(), false)))
            .collect();

        for (path, is_new) in pending {
            let Some(scanned) = changes.disk.get(&path) else {
                continue;
            };

            if let Some(skipped) = self.check_breaker(&path, &scanned.checksum, threshold).await {
                debug!(%path, count = skipped.failure_count, "circuit open; skipping file");
                report.skipped_files.push(skipped);
                continue;
            }

            match self.sync_file_inner(&path, Some(scanned)).await {
                Ok((_, checksum)) => {
                    self.breaker.lock().await.remove(&path);
                    report.checksums.insert(path.clone(), checksum);
                    if is_new {
                        report.new.insert(path);
                    } else {
                        report.modified.insert(path);
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    let count = self.record_failure(&path, &scanned.checksum, &err).await;
                    warn!(%path, count, %err, "file sync failed");
                    report.skipped_files.push(SkippedFile {
                        path,
                        failure_count: count,
                        reason: err.to_string(),
                    });
                }
            }
        }

        // 4. resolution sweep
        let resolved = self.resolve_forward_references().await?;
        if resolved > 0 {
            debug!(resolved, "forward references resolved");
        }

        if full_scan {
            self.projects
                .set_watermark(self.ctx.project_id, Utc::now().timestamp_millis(), files_seen)
                .await?;
        }

        report.total = report.total_changes();
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            total = report.total,
            skipped = report.skipped_files.len(),
            duration_ms = report.duration_ms,
            "sync pass finished"
        );
        Ok(report)
    }

    /// Classify changes without applying anything: a dry-run report for
    /// status displays. Always scans the full tree.
    pub async fn scan_status(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        let started = Instant::now();

        let (disk, _) = self.collect_scan(None).await?;
        let changes = self.build_change_set(disk, true).await?;

        let mut report = SyncReport {
            new: changes.new,
            modified: changes.modified,
            deleted: changes.deleted,
            moves: changes.moves.into_iter().collect(),
            checksums: changes
                .disk
                .into_iter()
                .map(|(path, scanned)| (path, scanned.checksum))
                .collect(),
            ..Default::default()
        };
        report.total = report.total_changes();
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Sync a single file end to end. `new` only affects logging; the
    /// write path is identical either way.
    pub async fn sync_file(&self, path: &str, new: bool) -> Result<(Entity, String)> {
        debug!(path, new, "syncing single file");
        self.sync_file_inner(path, None).await
    }

    /// Remove a file's entity and every dependent row. Idempotent.
    pub async fn handle_delete(&self, path: &str) -> Result<()> {
        let Some(entity) = self.entities.delete_by_file_path(path).await? else {
            return Ok(());
        };
        self.search.delete_by_entity(entity.id).await?;
        debug!(path, entity_id = entity.id, "entity deleted");
        Ok(())
    }

    /// Re-home an entity after a rename. Identity, permalink, and
    /// checksum survive unless permalink rewriting is enabled.
    pub async fn handle_move(&self, old: &str, new: &str) -> Result<()> {
        let Some(entity) = self.entities.get_by_file_path(old).await? else {
            debug!(old, new, "move source unknown; nothing to do");
            return Ok(());
        };

        self.entities.update_file_path(entity.id, new).await?;

        if self.ctx.options.update_permalinks_on_move {
            let permalink = self.resolve_permalink(new, None).await?;
            if entity.permalink.as_deref() != Some(permalink.as_str()) {
                debug!(new, %permalink, "rewriting permalink after move");
                let mut updates = Mapping::new();
                updates.insert(Value::from("permalink"), Value::from(permalink.clone()));
                let checksum = self.files.write_frontmatter(new, &updates).await?;
                self.entities
                    .update_permalink(entity.id, &permalink, &checksum)
                    .await?;
            }
        }

        self.reindex_entity(entity.id).await?;
        Ok(())
    }

    /// Rebuild the search mirror from the relational tables, re-reading
    /// note bodies from disk where available.
    pub async fn reindex_search(&self) -> Result<()> {
        self.search.reindex_all().await?;
        let states = self.entities.file_states().await?;
        for state in states {
            if let Some(entity) = self.entities.get_by_file_path(&state.file_path).await? {
                if entity.is_markdown() {
                    self.reindex_entity(entity.id).await?;
                }
            }
        }
        Ok(())
    }

    async fn collect_scan(
        &self,
        watermark_ms: Option<i64>,
    ) -> Result<(HashMap<String, ScannedFile>, i64)> {
        let mut stream = self.walker.scan(watermark_ms);
        let mut disk = HashMap::new();
        while let Some(ScanEntry { rel_path, stat }) = stream.next().await {
            match self.files.compute_checksum(&rel_path).await {
                Ok(checksum) => {
                    disk.insert(rel_path, ScannedFile { checksum, stat });
                }
                Err(err) => warn!(%rel_path, %err, "cannot hash file; leaving it out of this pass"),
            }
        }
        Ok((disk, stream.files_seen() as i64))
    }

    async fn build_change_set(
        &self,
        disk: HashMap<String, ScannedFile>,
        full_scan: bool,
    ) -> Result<ChangeSet> {
        let mut changes = ChangeSet {
            disk,
            ..Default::default()
        };

        let db_states = self.entities.file_states().await?;
        let db_checksums: HashMap<&str, Option<&str>> = db_states
            .iter()
            .map(|s| (s.file_path.as_str(), s.checksum.as_deref()))
            .collect();

        for (path, scanned) in &changes.disk {
            match db_checksums.get(path.as_str()) {
                None => {
                    changes.new.insert(path.clone());
                }
                // a NULL checksum is an interrupted sync; redo it
                Some(db_checksum) if *db_checksum != Some(scanned.checksum.as_str()) => {
                    changes.modified.insert(path.clone());
                }
                Some(_) => {}
            }
        }

        // watermark-limited scans never report deletions or moves
        if full_scan {
            for state in &db_states {
                if !changes.disk.contains_key(&state.file_path) {
                    changes.deleted.insert(state.file_path.clone());
                }
            }

            // pair (deleted, new) by checksum: those are moves
            let mut new_by_checksum: HashMap<&str, VecDeque<String>> = HashMap::new();
            for path in &changes.new {
                if let Some(scanned) = changes.disk.get(path) {
                    new_by_checksum
                        .entry(scanned.checksum.as_str())
                        .or_default()
                        .push_back(path.clone());
                }
            }
            for old_path in changes.deleted.clone() {
                let Some(Some(db_checksum)) = db_checksums.get(old_path.as_str()) else {
                    continue;
                };
                let Some(candidates) = new_by_checksum.get_mut(db_checksum) else {
                    continue;
                };
                let Some(new_path) = candidates.pop_front() else {
                    continue;
                };
                changes.new.remove(&new_path);
                changes.deleted.remove(&old_path);
                changes.moves.push((old_path, new_path));
            }
        }

        Ok(changes)
    }

    async fn sync_file_inner(
        &self,
        path: &str,
        hint: Option<&ScannedFile>,
    ) -> Result<(Entity, String)> {
        if is_markdown_path(path) {
            self.sync_markdown_file(path, hint.map(|h| h.stat)).await
        } else {
            self.sync_regular_file(path, hint).await
        }
    }

    async fn sync_markdown_file(
        &self,
        path: &str,
        stat_hint: Option<FileStat>,
    ) -> Result<(Entity, String)> {
        let (content, mut checksum) = self.files.read_to_string(path).await?;

        let doc = if content.len() > BLOCKING_PARSE_THRESHOLD {
            let parser = self.parser;
            let owned_path = path.to_string();
            let owned_content = content.clone();
            tokio::task::spawn_blocking(move || parser.parse(&owned_path, &owned_content))
                .await
                .map_err(|e| CoreError::fatal(format!("parse task failed: {e}")))??
        } else {
            self.parser.parse(path, &content)?
        };

        let permalink = self
            .resolve_permalink(path, doc.frontmatter.permalink.as_deref())
            .await?;

        // persist the resolved permalink in the note itself; the write
        // changes the file, so the post-write checksum is the one we keep
        if doc.frontmatter.permalink.as_deref() != Some(permalink.as_str()) {
            debug!(path, %permalink, "writing permalink into frontmatter");
            let mut updates = Mapping::new();
            updates.insert(Value::from("permalink"), Value::from(permalink.clone()));
            checksum = self.files.write_frontmatter(path, &updates).await?;
        }

        let stat = match stat_hint {
            Some(stat) => stat,
            None => self.files.stat(path).await?,
        };
        let now = Utc::now().timestamp();
        let created_at = doc
            .frontmatter
            .created
            .map(|d| d.timestamp())
            .or_else(|| stat.created_secs())
            .unwrap_or(now);
        let updated_at = doc
            .frontmatter
            .modified
            .map(|d| d.timestamp())
            .unwrap_or_else(|| if stat.modified_ms > 0 { stat.modified_secs() } else { now });

        let draft = EntityDraft {
            title: doc
                .frontmatter
                .title
                .clone()
                .unwrap_or_else(|| file_stem_of(path).to_string()),
            entity_type: doc
                .frontmatter
                .entity_type
                .clone()
                .unwrap_or_else(|| "note".to_string()),
            content_type: "text/markdown".to_string(),
            file_path: path.to_string(),
            permalink: Some(permalink),
            created_at,
            updated_at,
        };

        let observations: Vec<ObservationDraft> = doc
            .observations
            .iter()
            .map(|obs| ObservationDraft {
                content: obs.content.clone(),
                category: obs.category.clone(),
                context: obs.context.clone(),
                tags: obs.tags.clone(),
            })
            .collect();

        let mut relations = Vec::with_capacity(doc.relations.len());
        for parsed in &doc.relations {
            let to_id = self
                .resolver
                .resolve_link(&parsed.target)
                .await?
                .map(|target| target.id);
            relations.push(RelationDraft {
                relation_type: parsed.relation_type.clone(),
                to_name: parsed.target.clone(),
                to_id,
                context: parsed.context.clone(),
            });
        }

        let (entity, observations, relations) = self
            .entities
            .sync_entity(&draft, &observations, &relations, &checksum)
            .await?;

        self.search
            .index_entity(&entity, Some(&doc.body), &observations, &relations)
            .await?;

        Ok((entity, checksum))
    }

    async fn sync_regular_file(
        &self,
        path: &str,
        hint: Option<&ScannedFile>,
    ) -> Result<(Entity, String)> {
        let checksum = match hint {
            Some(scanned) => scanned.checksum.clone(),
            None => self.files.compute_checksum(path).await?,
        };
        let stat = match hint {
            Some(scanned) => scanned.stat,
            None => self.files.stat(path).await?,
        };

        let permalink = self.resolve_permalink(path, None).await?;
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        let now = Utc::now().timestamp();

        let draft = EntityDraft {
            title: file_name_of(path).to_string(),
            entity_type: "file".to_string(),
            content_type,
            file_path: path.to_string(),
            permalink: Some(permalink),
            created_at: stat.created_secs().unwrap_or(now),
            updated_at: if stat.modified_ms > 0 { stat.modified_secs() } else { now },
        };

        let (entity, _, _) = self.entities.sync_entity(&draft, &[], &[], &checksum).await?;
        self.search.index_entity(&entity, None, &[], &[]).await?;

        Ok((entity, checksum))
    }

    /// Pick the entity's permalink: frontmatter wins when present, the
    /// path-derived slug otherwise, and collisions take `-1`, `-2`, ...
    /// suffixes until unique within the project.
    async fn resolve_permalink(&self, path: &str, from_frontmatter: Option<&str>) -> Result<String> {
        let desired = match from_frontmatter {
            Some(p) if !p.trim().is_empty() => p.trim().to_string(),
            _ => permalink_from_path(path),
        };

        let mut candidate = desired.clone();
        let mut suffix = 0u32;
        loop {
            match self.entities.get_by_permalink(&candidate).await? {
                None => return Ok(candidate),
                Some(owner) if owner.file_path == path => return Ok(candidate),
                Some(_) => {
                    suffix += 1;
                    candidate = format!("{desired}-{suffix}");
                }
            }
        }
    }

    async fn reindex_entity(&self, entity_id: i64) -> Result<()> {
        let Some(entity) = self.entities.get_by_id(entity_id).await? else {
            return Ok(());
        };
        let observations = self.entities.observations_for(entity_id).await?;
        let relations = self.entities.relations_from(entity_id).await?;

        let body = if entity.is_markdown() {
            match self.files.read_to_string(&entity.file_path).await {
                Ok((content, _)) => frontmatter::split(&content)
                    .map(|(_, body)| body.to_string())
                    .ok(),
                Err(err) => {
                    debug!(file_path = %entity.file_path, %err, "cannot re-read body for indexing");
                    None
                }
            }
        } else {
            None
        };

        self.search
            .index_entity(&entity, body.as_deref(), &observations, &relations)
            .await
    }

    /// Revisit every forward reference; edges whose target now exists
    /// are completed and their source entity reindexed.
    async fn resolve_forward_references(&self) -> Result<usize> {
        let mut touched = BTreeSet::new();
        let mut resolved = 0usize;

        for relation in self.entities.find_unresolved_relations().await? {
            let Some(target) = self.resolver.resolve_link(&relation.to_name).await? else {
                continue;
            };
            // a link that resolves back to its own source stays deferred
            if target.id == relation.from_id {
                continue;
            }
            if self.entities.resolve_relation(relation.id, target.id).await? {
                debug!(
                    to_name = %relation.to_name,
                    target_id = target.id,
                    "forward reference resolved"
                );
                resolved += 1;
                touched.insert(relation.from_id);
            }
        }

        for entity_id in touched {
            self.reindex_entity(entity_id).await?;
        }
        Ok(resolved)
    }

    /// Returns the quarantine record when the breaker is open for this
    /// path and the content has not changed since the failures.
    async fn check_breaker(
        &self,
        path: &str,
        checksum: &str,
        threshold: u32,
    ) -> Option<SkippedFile> {
        let breaker = self.breaker.lock().await;
        let entry = breaker.get(path)?;
        if entry.count >= threshold && entry.last_checksum == checksum {
            return Some(SkippedFile {
                path: path.to_string(),
                failure_count: entry.count,
                reason: entry.reason.clone(),
            });
        }
        None
    }

    async fn record_failure(&self, path: &str, checksum: &str, err: &CoreError) -> u32 {
        let mut breaker = self.breaker.lock().await;
        let entry = breaker.entry(path.to_string()).or_insert(FailureEntry {
            count: 0,
            last_checksum: String::new(),
            reason: String::new(),
        });
        // a content change resets the streak
        if entry.last_checksum != checksum {
            entry.count = 0;
        }
        entry.count += 1;
        entry.last_checksum = checksum.to_string();
        entry.reason = err.to_string();
        entry.count
    }
}

fn is_markdown_path(path: &str) -> bool {
    match path.len().checked_sub(3).and_then(|i| path.get(i..)) {
        Some(ext) => ext.eq_ignore_ascii_case(".md"),
        None => false,
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn file_stem_of(path: &str) -> &str {
    let name = file_name_of(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
