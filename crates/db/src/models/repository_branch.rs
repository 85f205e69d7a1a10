use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct RepositoryBranch {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub branch_name: String,
    /// Last commit the generator fully processed; NULL until the first pass.
    pub last_commit_id: Option<String>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepositoryBranch {
    pub async fn create(
        pool: &SqlitePool,
        repository_id: Uuid,
        branch_name: &str,
        branch_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, RepositoryBranch>(
            r#"INSERT INTO repository_branches (
                   id, repository_id, branch_name, last_commit_id,
                   last_processed_at, created_at, updated_at
               )
               VALUES ($1, $2, $3, NULL, NULL, $4, $5)
               RETURNING *"#,
        )
        .bind(branch_id)
        .bind(repository_id)
        .bind(branch_name)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, RepositoryBranch>(
            "SELECT * FROM repository_branches WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Branches of one repository in processing order.
    pub async fn find_by_repository_id(
        pool: &SqlitePool,
        repository_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, RepositoryBranch>(
            r#"SELECT * FROM repository_branches
               WHERE repository_id = $1
               ORDER BY created_at ASC"#,
        )
        .bind(repository_id)
        .fetch_all(pool)
        .await
    }

    pub async fn advance_commit(
        pool: &SqlitePool,
        id: Uuid,
        commit_id: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE repository_branches
               SET last_commit_id = $1, last_processed_at = $2, updated_at = $3
               WHERE id = $4"#,
        )
        .bind(commit_id)
        .bind(processed_at)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
