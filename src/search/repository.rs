//! Write-through mirror of the knowledge graph in a SQLite FTS5 table.
//!
//! Every successful file sync rewrites the entity's rows: one for the
//! entity, one per observation, one per relation.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::debug;

use crate::db::SqlDb;
use crate::error::Result;
use crate::knowledge::entity::{Entity, Observation, Relation};
use crate::knowledge::permalink::permalink_from_path;

use super::query::{SearchHit, SearchItemType, SearchQuery};

const DEFAULT_LIMIT: i64 = 50;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Replace all index rows belonging to `entity`. `body` is the note
    /// body for markdown files, `None` for binary stubs.
    async fn index_entity(
        &self,
        entity: &Entity,
        body: Option<&str>,
        observations: &[Observation],
        relations: &[Relation],
    ) -> Result<()>;

    async fn delete_by_permalink(&self, permalink: &str) -> Result<()>;
    /// Remove the entity's own rows plus any relation rows that point at
    /// it (their relational counterparts are gone via cascade).
    async fn delete_by_entity(&self, entity_id: i64) -> Result<()>;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Drop and rebuild the project's index from the relational tables.
    async fn reindex_all(&self) -> Result<()>;
}

pub struct SearchRepository {
    sql: SqlDb,
    project_id: i64,
}

impl SearchRepository {
    pub fn new(sql: SqlDb, project_id: i64) -> Self {
        SearchRepository { sql, project_id }
    }
}

/// Quote terms containing `/` or `-` so the tokenizer treats them as a
/// phrase, then prefix-match.
fn build_match_expression(text: &str) -> String {
    let term = text.trim().to_lowercase();
    if term.contains(['/', '-']) {
        format!("\"{}\"*", term.replace('"', "\"\""))
    } else {
        format!("{term}*")
    }
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    project_id: i64,
    entity: &Entity,
    body: Option<&str>,
    observations: &[Observation],
    relations: &[Relation],
) -> Result<()> {
    const INSERT: &str = "\
INSERT INTO search_index (project_id, id, type, title, content, permalink, file_path,
                          from_id, to_id, relation_type, entity_id, category,
                          metadata, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

    let entity_metadata = serde_json::json!({ "entity_type": entity.entity_type }).to_string();
    sqlx::query(INSERT)
        .bind(project_id)
        .bind(entity.id)
        .bind(SearchItemType::Entity.as_str())
        .bind(&entity.title)
        .bind(body.unwrap_or_default())
        .bind(&entity.permalink)
        .bind(&entity.file_path)
        .bind(None::<i64>)
        .bind(None::<i64>)
        .bind(None::<String>)
        .bind(entity.id)
        .bind(None::<String>)
        .bind(&entity_metadata)
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .execute(&mut *conn)
        .await?;

    for obs in observations {
        let permalink = entity
            .permalink
            .as_ref()
            .map(|p| format!("{p}/observations/{}", obs.id));
        let metadata = serde_json::json!({
            "entity_type": entity.entity_type,
            "tags": obs.tags,
        })
        .to_string();
        sqlx::query(INSERT)
            .bind(project_id)
            .bind(obs.id)
            .bind(SearchItemType::Observation.as_str())
            .bind(obs.category.as_deref().unwrap_or("observation"))
            .bind(&obs.content)
            .bind(permalink)
            .bind(&entity.file_path)
            .bind(None::<i64>)
            .bind(None::<i64>)
            .bind(None::<String>)
            .bind(entity.id)
            .bind(&obs.category)
            .bind(&metadata)
            .bind(entity.created_at)
            .bind(entity.updated_at)
            .execute(&mut *conn)
            .await?;
    }

    for relation in relations {
        let permalink = entity.permalink.as_ref().map(|p| {
            format!(
                "{p}/{}/{}",
                relation.relation_type,
                permalink_from_path(&relation.to_name)
            )
        });
        let metadata = serde_json::json!({ "entity_type": entity.entity_type }).to_string();
        sqlx::query(INSERT)
            .bind(project_id)
            .bind(relation.id)
            .bind(SearchItemType::Relation.as_str())
            .bind(&relation.relation_type)
            .bind(&relation.to_name)
            .bind(permalink)
            .bind(&entity.file_path)
            .bind(relation.from_id)
            .bind(relation.to_id)
            .bind(&relation.relation_type)
            .bind(entity.id)
            .bind(None::<String>)
            .bind(&metadata)
            .bind(entity.created_at)
            .bind(entity.updated_at)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

fn hit_from_row(row: &SqliteRow) -> Result<SearchHit, sqlx::Error> {
    let type_str: String = row.try_get("type")?;
    let metadata_json: Option<String> = row.try_get("metadata")?;
    Ok(SearchHit {
        id: row.try_get("id")?,
        item_type: SearchItemType::parse(&type_str).unwrap_or(SearchItemType::Entity),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        permalink: row.try_get("permalink")?,
        file_path: row.try_get("file_path")?,
        score: row.try_get("score")?,
        entity_id: row.try_get("entity_id")?,
        from_id: row.try_get("from_id")?,
        to_id: row.try_get("to_id")?,
        relation_type: row.try_get("relation_type")?,
        category: row.try_get("category")?,
        metadata: metadata_json
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl SearchIndex for SearchRepository {
    async fn index_entity(
        &self,
        entity: &Entity,
        body: Option<&str>,
        observations: &[Observation],
        relations: &[Relation],
    ) -> Result<()> {
        let mut tx = self.sql.begin().await?;

        sqlx::query(
            "DELETE FROM search_index
             WHERE project_id = ? AND (entity_id = ? OR (type = 'entity' AND id = ?))",
        )
        .bind(self.project_id)
        .bind(entity.id)
        .bind(entity.id)
        .execute(&mut *tx)
        .await?;

        insert_rows(
            &mut tx,
            self.project_id,
            entity,
            body,
            observations,
            relations,
        )
        .await?;

        tx.commit().await?;
        debug!(file_path = %entity.file_path, "indexed entity");
        Ok(())
    }

    async fn delete_by_permalink(&self, permalink: &str) -> Result<()> {
        sqlx::query("DELETE FROM search_index WHERE project_id = ? AND permalink = ?")
            .bind(self.project_id)
            .bind(permalink)
            .execute(self.sql.as_ref())
            .await?;
        Ok(())
    }

    async fn delete_by_entity(&self, entity_id: i64) -> Result<()> {
        sqlx::query(
            "DELETE FROM search_index
             WHERE project_id = ?
               AND (entity_id = ? OR from_id = ? OR to_id = ?
                    OR (type = 'entity' AND id = ?))",
        )
        .bind(self.project_id)
        .bind(entity_id)
        .bind(entity_id)
        .bind(entity_id)
        .bind(entity_id)
        .execute(self.sql.as_ref())
        .await?;
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let has_text = query.text.as_deref().is_some_and(|t| !t.trim().is_empty());

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, type, title, content, permalink, file_path, from_id, to_id, \
             relation_type, entity_id, category, metadata, created_at, updated_at, ",
        );
        if has_text {
            qb.push("bm25(search_index) AS score");
        } else {
            qb.push("0.0 AS score");
        }
        qb.push(" FROM search_index WHERE project_id = ");
        qb.push_bind(self.project_id);

        if let Some(text) = query.text.as_deref() {
            if has_text {
                qb.push(" AND search_index MATCH ");
                qb.push_bind(build_match_expression(text));
            }
        }

        if let Some(permalink) = &query.permalink {
            qb.push(" AND permalink = ");
            qb.push_bind(permalink.clone());
        } else if let Some(glob) = &query.permalink_glob {
            qb.push(" AND permalink LIKE ");
            qb.push_bind(glob.replace('*', "%"));
        }

        if !query.types.is_empty() {
            qb.push(" AND type IN (");
            let mut separated = qb.separated(", ");
            for item_type in &query.types {
                separated.push_bind(item_type.as_str());
            }
            separated.push_unseparated(")");
        }

        if !query.entity_types.is_empty() {
            qb.push(" AND json_extract(metadata, '$.entity_type') IN (");
            let mut separated = qb.separated(", ");
            for entity_type in &query.entity_types {
                separated.push_bind(entity_type.clone());
            }
            separated.push_unseparated(")");
        }

        if let Some(after) = &query.after_date {
            qb.push(" AND created_at >= ");
            qb.push_bind(after.timestamp());
        }

        if has_text {
            qb.push(" ORDER BY score ASC, updated_at DESC");
        } else {
            qb.push(" ORDER BY updated_at DESC");
        }
        qb.push(" LIMIT ");
        qb.push_bind(query.limit.unwrap_or(DEFAULT_LIMIT));

        let rows = qb.build().fetch_all(self.sql.as_ref()).await?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            hits.push(hit_from_row(row)?);
        }
        Ok(hits)
    }

    async fn reindex_all(&self) -> Result<()> {
        let mut tx = self.sql.begin().await?;

        sqlx::query("DELETE FROM search_index WHERE project_id = ?")
            .bind(self.project_id)
            .execute(&mut *tx)
            .await?;

        let entities =
            sqlx::query_as::<_, Entity>("SELECT * FROM entity WHERE project_id = ? ORDER BY id")
                .bind(self.project_id)
                .fetch_all(&mut *tx)
                .await?;

        for entity in &entities {
            let obs_rows =
                sqlx::query("SELECT * FROM observation WHERE entity_id = ? ORDER BY id")
                    .bind(entity.id)
                    .fetch_all(&mut *tx)
                    .await?;
            let mut observations = Vec::with_capacity(obs_rows.len());
            for row in &obs_rows {
                let tags_json: String = row.try_get("tags")?;
                observations.push(Observation {
                    id: row.try_get("id")?,
                    entity_id: row.try_get("entity_id")?,
                    content: row.try_get("content")?,
                    category: row.try_get("category")?,
                    context: row.try_get("context")?,
                    tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                });
            }

            let relations = sqlx::query_as::<_, Relation>(
                "SELECT * FROM relation WHERE from_id = ? ORDER BY id",
            )
            .bind(entity.id)
            .fetch_all(&mut *tx)
            .await?;

            insert_rows(&mut tx, self.project_id, entity, None, &observations, &relations)
                .await?;
        }

        tx.commit().await?;
        debug!(count = entities.len(), "search index rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_expression_is_prefix_matched() {
        assert_eq!(build_match_expression("Coffee"), "coffee*");
    }

    #[test]
    fn slashes_and_dashes_are_quoted() {
        assert_eq!(
            build_match_expression("notes/hello"),
            "\"notes/hello\"*"
        );
        assert_eq!(build_match_expression("pour-over"), "\"pour-over\"*");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(
            build_match_expression("a\"b-c"),
            "\"a\"\"b-c\"*"
        );
    }
}
