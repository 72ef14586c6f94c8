//! Programmatic note operations. Everything funnels through the same
//! pipeline as on-disk edits: write the file, then sync it, so the index
//! can never diverge from the filesystem.

use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::files::FileStore;
use crate::markdown::frontmatter;
use crate::sync::SyncService;

use super::entity::Entity;
use super::entity_repository::EntityStore;
use super::link_resolver::LinkResolver;

pub struct KnowledgeService {
    sync: Arc<SyncService>,
    files: Arc<dyn FileStore>,
    entities: Arc<dyn EntityStore>,
    resolver: Arc<dyn LinkResolver>,
}

impl KnowledgeService {
    pub fn new(
        sync: Arc<SyncService>,
        files: Arc<dyn FileStore>,
        entities: Arc<dyn EntityStore>,
        resolver: Arc<dyn LinkResolver>,
    ) -> Self {
        KnowledgeService {
            sync,
            files,
            entities,
            resolver,
        }
    }

    /// Look up an entity by permalink or file path.
    pub async fn get_entity(&self, identifier: &str) -> Result<Entity> {
        if let Some(entity) = self.entities.get_by_permalink(identifier).await? {
            return Ok(entity);
        }
        if let Some(entity) = self.entities.get_by_file_path(identifier).await? {
            return Ok(entity);
        }
        Err(CoreError::EntityNotFound(identifier.to_string()))
    }

    /// Resolve a `[[wiki-link]]` target the way relation application does.
    pub async fn resolve_link(&self, target: &str) -> Result<Option<Entity>> {
        self.resolver.resolve_link(target).await
    }

    /// Write a note to disk and index it in one step.
    pub async fn create_or_update_note(
        &self,
        file_path: &str,
        title: Option<&str>,
        entity_type: Option<&str>,
        content: &str,
    ) -> Result<(Entity, String)> {
        let mut mapping = Mapping::new();
        if let Some(title) = title {
            mapping.insert(Value::from("title"), Value::from(title));
        }
        if let Some(entity_type) = entity_type {
            mapping.insert(Value::from("type"), Value::from(entity_type));
        }

        let document = if mapping.is_empty() {
            content.to_string()
        } else {
            frontmatter::compose(&mapping, &format!("\n{content}"))
                .map_err(|reason| CoreError::parse(file_path, reason))?
        };

        let new = !self.files.exists(file_path).await;
        self.files.write_atomic(file_path, document.as_bytes()).await?;
        debug!(file_path, new, "note written; syncing");
        self.sync.sync_file(file_path, new).await
    }

    pub async fn read_note(&self, identifier: &str) -> Result<(Entity, String)> {
        let entity = self.get_entity(identifier).await?;
        let (content, _) = self.files.read_to_string(&entity.file_path).await?;
        Ok((entity, content))
    }

    /// Delete the file and cascade the entity. Returns false when the
    /// identifier did not resolve (already gone).
    pub async fn delete_note(&self, identifier: &str) -> Result<bool> {
        match self.get_entity(identifier).await {
            Ok(entity) => {
                self.files.delete(&entity.file_path).await?;
                self.sync.handle_delete(&entity.file_path).await?;
                Ok(true)
            }
            Err(CoreError::EntityNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Rename on disk, then re-home the entity.
    pub async fn move_note(&self, identifier: &str, new_path: &str) -> Result<Entity> {
        let entity = self.get_entity(identifier).await?;
        self.files.rename(&entity.file_path, new_path).await?;
        self.sync.handle_move(&entity.file_path, new_path).await?;
        self.entities
            .get_by_file_path(new_path)
            .await?
            .ok_or_else(|| CoreError::EntityNotFound(new_path.to_string()))
    }
}
