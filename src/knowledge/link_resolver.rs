//! Resolution of free-form `[[wiki-link]]` targets to entities.
//!
//! The resolver never creates entities; an unresolved target stays a
//! forward reference until the target file is synced.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::entity::Entity;
use super::entity_repository::EntityStore;
use super::permalink::permalink_from_path;

#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Map a link target to an existing entity, or `None`.
    async fn resolve_link(&self, target: &str) -> Result<Option<Entity>>;
}

pub struct DbLinkResolver {
    entities: Arc<dyn EntityStore>,
}

impl DbLinkResolver {
    pub fn new(entities: Arc<dyn EntityStore>) -> Self {
        DbLinkResolver { entities }
    }
}

#[async_trait]
impl LinkResolver for DbLinkResolver {
    async fn resolve_link(&self, target: &str) -> Result<Option<Entity>> {
        let target = target.trim();
        if target.is_empty() {
            return Ok(None);
        }

        // 1. exact permalink
        if let Some(entity) = self.entities.get_by_permalink(target).await? {
            return Ok(Some(entity));
        }

        // 2. case-insensitive permalink
        if let Some(entity) = self
            .entities
            .get_by_permalink_case_insensitive(target)
            .await?
        {
            return Ok(Some(entity));
        }

        // 3. exact file path
        if let Some(entity) = self.entities.get_by_file_path(target).await? {
            return Ok(Some(entity));
        }

        // 4. title, exact then case-insensitive
        if let Some(entity) = self.entities.get_by_title(target, false).await? {
            return Ok(Some(entity));
        }
        if let Some(entity) = self.entities.get_by_title(target, true).await? {
            return Ok(Some(entity));
        }

        // 5. fuzzy: permalink prefix on the slugified target, then
        // filename stem
        let slug = permalink_from_path(target);
        if !slug.is_empty() {
            if let Some(entity) = self
                .entities
                .list_by_permalink_prefix(&slug)
                .await?
                .into_iter()
                .next()
            {
                return Ok(Some(entity));
            }
        }
        if let Some(entity) = self.entities.get_by_file_stem(target).await? {
            return Ok(Some(entity));
        }

        Ok(None)
    }
}
