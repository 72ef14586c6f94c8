//! Neighborhood views over the knowledge graph: an entity, its
//! observations, and everything reachable over relations within a few
//! hops.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use tracing::debug;

use crate::db::SqlDb;
use crate::error::Result;

use super::entity::{Entity, Observation, Relation};

/// Walking the whole project through a hub note gets expensive fast;
/// cap the frontier instead of the caller's patience.
const MAX_RELATED: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct RelatedEntity {
    pub entity: Entity,
    /// Relation hops from the primary entity (1 = direct neighbour).
    pub depth: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityContext {
    pub primary: Entity,
    pub observations: Vec<Observation>,
    /// Every edge touched while walking, primary's own edges first.
    pub relations: Vec<Relation>,
    pub related: Vec<RelatedEntity>,
}

pub struct ContextService {
    sql: SqlDb,
    project_id: i64,
}

impl ContextService {
    pub fn new(sql: SqlDb, project_id: i64) -> Self {
        ContextService { sql, project_id }
    }

    /// Breadth-first walk over resolved relations, both directions,
    /// up to `max_depth` hops. `since` drops related entities that have
    /// not been updated at or after the given instant; the primary
    /// entity is always included.
    pub async fn build_context(
        &self,
        primary: &Entity,
        max_depth: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<EntityContext> {
        let observations = self.observations_of(primary.id).await?;

        let mut visited: HashSet<i64> = HashSet::from([primary.id]);
        let mut frontier: Vec<i64> = vec![primary.id];
        let mut relations: Vec<Relation> = Vec::new();
        let mut seen_edges: HashSet<i64> = HashSet::new();
        let mut related: Vec<RelatedEntity> = Vec::new();

        for depth in 1..=max_depth {
            if frontier.is_empty() || related.len() >= MAX_RELATED {
                break;
            }

            let edges = self.edges_touching(&frontier).await?;
            let mut next_frontier = Vec::new();

            for edge in edges {
                if !seen_edges.insert(edge.id) {
                    continue;
                }
                for neighbour in [Some(edge.from_id), edge.to_id].into_iter().flatten() {
                    if visited.insert(neighbour) {
                        next_frontier.push(neighbour);
                    }
                }
                relations.push(edge);
            }

            if !next_frontier.is_empty() {
                for entity in self.entities_by_ids(&next_frontier, since).await? {
                    related.push(RelatedEntity { entity, depth });
                    if related.len() >= MAX_RELATED {
                        break;
                    }
                }
            }
            frontier = next_frontier;
        }

        debug!(
            primary = primary.id,
            related = related.len(),
            edges = relations.len(),
            "context built"
        );

        Ok(EntityContext {
            primary: primary.clone(),
            observations,
            relations,
            related,
        })
    }

    async fn observations_of(&self, entity_id: i64) -> Result<Vec<Observation>> {
        use sqlx::Row;
        let rows = sqlx::query("SELECT * FROM observation WHERE entity_id = ? ORDER BY id")
            .bind(entity_id)
            .fetch_all(self.sql.as_ref())
            .await?;
        let mut observations = Vec::with_capacity(rows.len());
        for row in &rows {
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
        Ok(observations)
    }

    /// Resolved edges with either endpoint in `ids`.
    async fn edges_touching(&self, ids: &[i64]) -> Result<Vec<Relation>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM relation WHERE to_id IS NOT NULL AND (from_id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") OR to_id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")) ORDER BY id");

        let relations = qb
            .build_query_as::<Relation>()
            .fetch_all(self.sql.as_ref())
            .await?;
        Ok(relations)
    }

    async fn entities_by_ids(
        &self,
        ids: &[i64],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entity>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM entity WHERE project_id = ");
        qb.push_bind(self.project_id);
        qb.push(" AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        if let Some(since) = since {
            qb.push(" AND updated_at >= ");
            qb.push_bind(since.timestamp());
        }
        qb.push(" ORDER BY id");

        let entities = qb
            .build_query_as::<Entity>()
            .fetch_all(self.sql.as_ref())
            .await?;
        Ok(entities)
    }
}
