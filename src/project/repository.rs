use crate::db::SqlDb;
use crate::error::Result;

use super::types::Project;

#[derive(Clone)]
pub struct ProjectRepository {
    sql: SqlDb,
}

impl ProjectRepository {
    pub fn new(sql: SqlDb) -> Self {
        ProjectRepository { sql }
    }

    /// Register a project, or refresh its root if the name is already
    /// known. The watermark survives a re-registration with an unchanged
    /// root and is invalidated otherwise.
    pub async fn ensure(&self, name: &str, root: &str) -> Result<Project> {
        let project = sqlx::query_as::<_, Project>(
            "INSERT INTO project (name, root) VALUES (?, ?)
             ON CONFLICT (name) DO UPDATE SET
                 root = excluded.root,
                 last_scan_timestamp = CASE WHEN project.root = excluded.root
                                            THEN project.last_scan_timestamp ELSE NULL END,
                 last_file_count = CASE WHEN project.root = excluded.root
                                        THEN project.last_file_count ELSE NULL END
             RETURNING *",
        )
        .bind(name)
        .bind(root)
        .fetch_one(self.sql.as_ref())
        .await?;
        Ok(project)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM project WHERE id = ?")
            .bind(id)
            .fetch_optional(self.sql.as_ref())
            .await?;
        Ok(project)
    }

    pub async fn set_watermark(&self, id: i64, timestamp_ms: i64, file_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE project SET last_scan_timestamp = ?, last_file_count = ? WHERE id = ?",
        )
        .bind(timestamp_ms)
        .bind(file_count)
        .bind(id)
        .execute(self.sql.as_ref())
        .await?;
        Ok(())
    }

    pub async fn clear_watermark(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE project SET last_scan_timestamp = NULL, last_file_count = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(self.sql.as_ref())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn ensure_is_idempotent_and_keeps_watermark_for_same_root() {
        let sql = db::sqlite::init_in_memory().await.unwrap();
        let repo = ProjectRepository::new(sql);

        let first = repo.ensure("main", "/data/notes").await.unwrap();
        repo.set_watermark(first.id, 123, 7).await.unwrap();

        let second = repo.ensure("main", "/data/notes").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.last_scan_timestamp, Some(123));

        // moving the root invalidates the watermark
        let moved = repo.ensure("main", "/data/elsewhere").await.unwrap();
        assert_eq!(moved.last_scan_timestamp, None);
        assert_eq!(moved.last_file_count, None);
    }
}
