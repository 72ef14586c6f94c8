//! SQLite-backed storage for entities, observations, and relations.
//!
//! The per-file write path (`sync_entity`) runs inside a single
//! transaction so readers never observe a half-updated entity.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::db::SqlDb;
use crate::error::Result;

use super::entity::{
    Entity, EntityDraft, Observation, ObservationDraft, Relation, RelationDraft,
};

/// The slice of an entity row the change scanner needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileState {
    pub file_path: String,
    pub permalink: Option<String>,
    pub checksum: Option<String>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn file_states(&self) -> Result<Vec<FileState>>;
    async fn entity_count(&self) -> Result<i64>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Entity>>;
    async fn get_by_file_path(&self, file_path: &str) -> Result<Option<Entity>>;
    async fn get_by_permalink(&self, permalink: &str) -> Result<Option<Entity>>;
    async fn get_by_permalink_case_insensitive(&self, permalink: &str) -> Result<Option<Entity>>;
    async fn list_by_permalink_prefix(&self, prefix: &str) -> Result<Vec<Entity>>;
    async fn get_by_title(&self, title: &str, case_insensitive: bool) -> Result<Option<Entity>>;
    async fn get_by_file_stem(&self, stem: &str) -> Result<Option<Entity>>;

    /// Upsert the entity and fully replace its observations and outgoing
    /// relations, in one transaction. The row carries a NULL checksum
    /// until the final update inside the same transaction, so a crash
    /// leaves either the old state or the complete new one.
    async fn sync_entity(
        &self,
        draft: &EntityDraft,
        observations: &[ObservationDraft],
        relations: &[RelationDraft],
        checksum: &str,
    ) -> Result<(Entity, Vec<Observation>, Vec<Relation>)>;

    async fn upsert_entity(&self, draft: &EntityDraft) -> Result<Entity>;
    async fn set_checksum(&self, entity_id: i64, checksum: Option<&str>) -> Result<()>;
    async fn replace_observations(
        &self,
        entity_id: i64,
        observations: &[ObservationDraft],
    ) -> Result<Vec<Observation>>;
    async fn replace_outgoing_relations(
        &self,
        entity_id: i64,
        relations: &[RelationDraft],
    ) -> Result<Vec<Relation>>;

    async fn observations_for(&self, entity_id: i64) -> Result<Vec<Observation>>;
    async fn relations_from(&self, entity_id: i64) -> Result<Vec<Relation>>;
    async fn find_unresolved_relations(&self) -> Result<Vec<Relation>>;
    async fn count_unresolved_relations(&self) -> Result<i64>;
    /// Point a forward reference at a now-existing target. Returns false
    /// when an identical resolved edge already exists; the redundant row
    /// is dropped in that case.
    async fn resolve_relation(&self, relation_id: i64, to_id: i64) -> Result<bool>;

    async fn update_file_path(&self, entity_id: i64, new_path: &str) -> Result<()>;
    async fn update_permalink(
        &self,
        entity_id: i64,
        permalink: &str,
        checksum: &str,
    ) -> Result<()>;
    /// Cascading delete; idempotent. Returns the deleted entity, if any.
    async fn delete_by_file_path(&self, file_path: &str) -> Result<Option<Entity>>;
}

pub struct EntityRepository {
    sql: SqlDb,
    project_id: i64,
}

impl EntityRepository {
    pub fn new(sql: SqlDb, project_id: i64) -> Self {
        EntityRepository { sql, project_id }
    }
}

const UPSERT_ENTITY: &str = "\
INSERT INTO entity (project_id, title, entity_type, content_type, file_path, permalink, checksum, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)
ON CONFLICT (project_id, file_path) DO UPDATE SET
    title = excluded.title,
    entity_type = excluded.entity_type,
    content_type = excluded.content_type,
    permalink = excluded.permalink,
    checksum = NULL,
    created_at = excluded.created_at,
    updated_at = excluded.updated_at
RETURNING *";

async fn upsert_entity_on(
    conn: &mut SqliteConnection,
    project_id: i64,
    draft: &EntityDraft,
) -> Result<Entity> {
    let entity = sqlx::query_as::<_, Entity>(UPSERT_ENTITY)
        .bind(project_id)
        .bind(&draft.title)
        .bind(&draft.entity_type)
        .bind(&draft.content_type)
        .bind(&draft.file_path)
        .bind(&draft.permalink)
        .bind(draft.created_at)
        .bind(draft.updated_at)
        .fetch_one(conn)
        .await?;
    Ok(entity)
}

async fn replace_observations_on(
    conn: &mut SqliteConnection,
    entity_id: i64,
    drafts: &[ObservationDraft],
) -> Result<Vec<Observation>> {
    sqlx::query("DELETE FROM observation WHERE entity_id = ?")
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;

    let mut rows = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let tags = serde_json::to_string(&draft.tags).unwrap_or_else(|_| "[]".to_string());
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO observation (entity_id, content, category, context, tags)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(entity_id)
        .bind(&draft.content)
        .bind(&draft.category)
        .bind(&draft.context)
        .bind(&tags)
        .fetch_one(&mut *conn)
        .await?;

        rows.push(Observation {
            id,
            entity_id,
            content: draft.content.clone(),
            category: draft.category.clone(),
            context: draft.context.clone(),
            tags: draft.tags.clone(),
        });
    }
    Ok(rows)
}

async fn replace_relations_on(
    conn: &mut SqliteConnection,
    entity_id: i64,
    drafts: &[RelationDraft],
) -> Result<Vec<Relation>> {
    sqlx::query("DELETE FROM relation WHERE from_id = ?")
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;

    let mut rows = Vec::with_capacity(drafts.len());
    for draft in drafts {
        // OR IGNORE tolerates the same resolved edge appearing twice in
        // one file; the duplicate insert returns no row
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT OR IGNORE INTO relation (from_id, to_id, to_name, relation_type, context)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(entity_id)
        .bind(draft.to_id)
        .bind(&draft.to_name)
        .bind(&draft.relation_type)
        .bind(&draft.context)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(id) = id {
            rows.push(Relation {
                id,
                from_id: entity_id,
                to_id: draft.to_id,
                to_name: draft.to_name.clone(),
                relation_type: draft.relation_type.clone(),
                context: draft.context.clone(),
            });
        }
    }
    Ok(rows)
}

fn observation_from_row(row: &SqliteRow) -> Result<Observation, sqlx::Error> {
    let tags_json: String = row.try_get("tags")?;
    Ok(Observation {
        id: row.try_get("id")?,
        entity_id: row.try_get("entity_id")?,
        content: row.try_get("content")?,
        category: row.try_get("category")?,
        context: row.try_get("context")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

fn file_stem(file_path: &str) -> &str {
    let name = file_path.rsplit('/').next().unwrap_or(file_path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

#[async_trait]
impl EntityStore for EntityRepository {
    async fn file_states(&self) -> Result<Vec<FileState>> {
        let states = sqlx::query_as::<_, FileState>(
            "SELECT file_path, permalink, checksum FROM entity WHERE project_id = ?",
        )
        .bind(self.project_id)
        .fetch_all(self.sql.as_ref())
        .await?;
        Ok(states)
    }

    async fn entity_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT count(*) FROM entity WHERE project_id = ?")
            .bind(self.project_id)
            .fetch_one(self.sql.as_ref())
            .await?;
        Ok(count)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Entity>> {
        let entity =
            sqlx::query_as::<_, Entity>("SELECT * FROM entity WHERE project_id = ? AND id = ?")
                .bind(self.project_id)
                .bind(id)
                .fetch_optional(self.sql.as_ref())
                .await?;
        Ok(entity)
    }

    async fn get_by_file_path(&self, file_path: &str) -> Result<Option<Entity>> {
        let entity = sqlx::query_as::<_, Entity>(
            "SELECT * FROM entity WHERE project_id = ? AND file_path = ?",
        )
        .bind(self.project_id)
        .bind(file_path)
        .fetch_optional(self.sql.as_ref())
        .await?;
        Ok(entity)
    }

    async fn get_by_permalink(&self, permalink: &str) -> Result<Option<Entity>> {
        let entity = sqlx::query_as::<_, Entity>(
            "SELECT * FROM entity WHERE project_id = ? AND permalink = ?",
        )
        .bind(self.project_id)
        .bind(permalink)
        .fetch_optional(self.sql.as_ref())
        .await?;
        Ok(entity)
    }

    async fn get_by_permalink_case_insensitive(&self, permalink: &str) -> Result<Option<Entity>> {
        let entity = sqlx::query_as::<_, Entity>(
            "SELECT * FROM entity WHERE project_id = ? AND lower(permalink) = lower(?)
             ORDER BY permalink LIMIT 1",
        )
        .bind(self.project_id)
        .bind(permalink)
        .fetch_optional(self.sql.as_ref())
        .await?;
        Ok(entity)
    }

    async fn list_by_permalink_prefix(&self, prefix: &str) -> Result<Vec<Entity>> {
        let entities = sqlx::query_as::<_, Entity>(
            "SELECT * FROM entity WHERE project_id = ? AND permalink LIKE ? || '%'
             ORDER BY length(permalink), permalink LIMIT 20",
        )
        .bind(self.project_id)
        .bind(prefix)
        .fetch_all(self.sql.as_ref())
        .await?;
        Ok(entities)
    }

    async fn get_by_title(&self, title: &str, case_insensitive: bool) -> Result<Option<Entity>> {
        let sql = if case_insensitive {
            "SELECT * FROM entity WHERE project_id = ? AND lower(title) = lower(?)
             ORDER BY updated_at DESC LIMIT 1"
        } else {
            "SELECT * FROM entity WHERE project_id = ? AND title = ?
             ORDER BY updated_at DESC LIMIT 1"
        };
        let entity = sqlx::query_as::<_, Entity>(sql)
            .bind(self.project_id)
            .bind(title)
            .fetch_optional(self.sql.as_ref())
            .await?;
        Ok(entity)
    }

    async fn get_by_file_stem(&self, stem: &str) -> Result<Option<Entity>> {
        let candidates = sqlx::query_as::<_, Entity>(
            "SELECT * FROM entity WHERE project_id = ? AND file_path LIKE '%' || ? || '%'
             ORDER BY updated_at DESC LIMIT 50",
        )
        .bind(self.project_id)
        .bind(stem)
        .fetch_all(self.sql.as_ref())
        .await?;

        Ok(candidates
            .into_iter()
            .find(|e| file_stem(&e.file_path).eq_ignore_ascii_case(stem)))
    }

    async fn sync_entity(
        &self,
        draft: &EntityDraft,
        observations: &[ObservationDraft],
        relations: &[RelationDraft],
        checksum: &str,
    ) -> Result<(Entity, Vec<Observation>, Vec<Relation>)> {
        let mut tx = self.sql.begin().await?;

        let mut entity = upsert_entity_on(&mut tx, self.project_id, draft).await?;
        let observations = replace_observations_on(&mut tx, entity.id, observations).await?;
        let relations = replace_relations_on(&mut tx, entity.id, relations).await?;

        sqlx::query("UPDATE entity SET checksum = ? WHERE id = ?")
            .bind(checksum)
            .bind(entity.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        entity.checksum = Some(checksum.to_string());
        Ok((entity, observations, relations))
    }

    async fn upsert_entity(&self, draft: &EntityDraft) -> Result<Entity> {
        let mut conn = self.sql.acquire().await?;
        upsert_entity_on(&mut conn, self.project_id, draft).await
    }

    async fn set_checksum(&self, entity_id: i64, checksum: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE entity SET checksum = ? WHERE id = ?")
            .bind(checksum)
            .bind(entity_id)
            .execute(self.sql.as_ref())
            .await?;
        Ok(())
    }

    async fn replace_observations(
        &self,
        entity_id: i64,
        observations: &[ObservationDraft],
    ) -> Result<Vec<Observation>> {
        let mut tx = self.sql.begin().await?;
        let rows = replace_observations_on(&mut tx, entity_id, observations).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn replace_outgoing_relations(
        &self,
        entity_id: i64,
        relations: &[RelationDraft],
    ) -> Result<Vec<Relation>> {
        let mut tx = self.sql.begin().await?;
        let rows = replace_relations_on(&mut tx, entity_id, relations).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn observations_for(&self, entity_id: i64) -> Result<Vec<Observation>> {
        let rows = sqlx::query("SELECT * FROM observation WHERE entity_id = ? ORDER BY id")
            .bind(entity_id)
            .fetch_all(self.sql.as_ref())
            .await?;
        let mut observations = Vec::with_capacity(rows.len());
        for row in &rows {
            observations.push(observation_from_row(row)?);
        }
        Ok(observations)
    }

    async fn relations_from(&self, entity_id: i64) -> Result<Vec<Relation>> {
        let relations = sqlx::query_as::<_, Relation>(
            "SELECT * FROM relation WHERE from_id = ? ORDER BY id",
        )
        .bind(entity_id)
        .fetch_all(self.sql.as_ref())
        .await?;
        Ok(relations)
    }

    async fn find_unresolved_relations(&self) -> Result<Vec<Relation>> {
        let relations = sqlx::query_as::<_, Relation>(
            "SELECT r.* FROM relation r
             JOIN entity e ON e.id = r.from_id
             WHERE e.project_id = ? AND r.to_id IS NULL
             ORDER BY r.id",
        )
        .bind(self.project_id)
        .fetch_all(self.sql.as_ref())
        .await?;
        Ok(relations)
    }

    async fn count_unresolved_relations(&self) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT count(*) FROM relation r
             JOIN entity e ON e.id = r.from_id
             WHERE e.project_id = ? AND r.to_id IS NULL",
        )
        .bind(self.project_id)
        .fetch_one(self.sql.as_ref())
        .await?;
        Ok(count)
    }

    async fn resolve_relation(&self, relation_id: i64, to_id: i64) -> Result<bool> {
        let mut tx = self.sql.begin().await?;

        sqlx::query("UPDATE OR IGNORE relation SET to_id = ? WHERE id = ?")
            .bind(to_id)
            .bind(relation_id)
            .execute(&mut *tx)
            .await?;

        let resolved_to: Option<i64> =
            sqlx::query_scalar("SELECT to_id FROM relation WHERE id = ?")
                .bind(relation_id)
                .fetch_one(&mut *tx)
                .await?;

        let resolved = resolved_to == Some(to_id);
        if !resolved {
            // an identical resolved edge already exists; this forward
            // reference is redundant
            sqlx::query("DELETE FROM relation WHERE id = ?")
                .bind(relation_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(resolved)
    }

    async fn update_file_path(&self, entity_id: i64, new_path: &str) -> Result<()> {
        sqlx::query("UPDATE entity SET file_path = ? WHERE id = ?")
            .bind(new_path)
            .bind(entity_id)
            .execute(self.sql.as_ref())
            .await?;
        Ok(())
    }

    async fn update_permalink(
        &self,
        entity_id: i64,
        permalink: &str,
        checksum: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE entity SET permalink = ?, checksum = ? WHERE id = ?")
            .bind(permalink)
            .bind(checksum)
            .bind(entity_id)
            .execute(self.sql.as_ref())
            .await?;
        Ok(())
    }

    async fn delete_by_file_path(&self, file_path: &str) -> Result<Option<Entity>> {
        let Some(entity) = self.get_by_file_path(file_path).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM entity WHERE id = ?")
            .bind(entity.id)
            .execute(self.sql.as_ref())
            .await?;
        Ok(Some(entity))
    }
}
