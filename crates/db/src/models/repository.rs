use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("a live repository is already registered for this remote URL")]
    DuplicateRemoteUrl,
    #[error("invalid remote URL: {0}")]
    InvalidRemoteUrl(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Repository {
    pub id: Uuid,
    pub owner_id: String,
    pub remote_url: String,
    pub org_name: String,
    pub repo_name: String,
    pub is_public: bool,
    #[serde(skip_serializing, default)]
    pub auth_account: Option<String>,
    #[serde(skip_serializing, default)]
    pub auth_secret: Option<String>,
    pub status: RepoStatus,
    pub primary_language: Option<String>,
    pub last_update_check_at: Option<DateTime<Utc>>,
    pub update_interval_minutes: Option<i64>,
    /// Opaque optimistic-concurrency token; bumped on every status write.
    pub version: i64,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateRepository {
    pub owner_id: String,
    pub remote_url: String,
    pub org_name: String,
    pub repo_name: String,
    pub is_public: bool,
    pub auth_account: Option<String>,
    pub auth_secret: Option<String>,
    pub update_interval_minutes: Option<i64>,
}

impl Repository {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateRepository,
        repository_id: Uuid,
    ) -> Result<Self, RepositoryError> {
        let now = Utc::now();
        let result = sqlx::query_as::<_, Repository>(
            r#"INSERT INTO repositories (
                   id, owner_id, remote_url, org_name, repo_name, is_public,
                   auth_account, auth_secret, status, primary_language,
                   last_update_check_at, update_interval_minutes, version,
                   deleted_at, created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, NULL, $10, 0, NULL, $11, $12)
               RETURNING *"#,
        )
        .bind(repository_id)
        .bind(&data.owner_id)
        .bind(&data.remote_url)
        .bind(&data.org_name)
        .bind(&data.repo_name)
        .bind(data.is_public)
        .bind(&data.auth_account)
        .bind(&data.auth_secret)
        .bind(RepoStatus::Pending)
        .bind(data.update_interval_minutes)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await;

        match result {
            Ok(repository) => Ok(repository),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RepositoryError::DuplicateRemoteUrl)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Repository>(
            "SELECT * FROM repositories WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_org_and_name(
        pool: &SqlitePool,
        org_name: &str,
        repo_name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Repository>(
            r#"SELECT * FROM repositories
               WHERE org_name = $1 AND repo_name = $2 AND deleted_at IS NULL"#,
        )
        .bind(org_name)
        .bind(repo_name)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_live(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Repository>(
            "SELECT * FROM repositories WHERE deleted_at IS NULL ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await
    }

    /// Repositories the processing worker should pick up, oldest first.
    pub async fn find_to_process(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Repository>(
            r#"SELECT * FROM repositories
               WHERE status IN ('pending', 'processing') AND deleted_at IS NULL
               ORDER BY created_at ASC"#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_completed(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Repository>(
            r#"SELECT * FROM repositories
               WHERE status = 'completed' AND deleted_at IS NULL
               ORDER BY last_update_check_at ASC NULLS FIRST, created_at ASC"#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_processing(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Repository>(
            "SELECT * FROM repositories WHERE status = 'processing' AND deleted_at IS NULL",
        )
        .fetch_all(pool)
        .await
    }

    /// Optimistic status write. Returns false when the row moved under the
    /// writer; the caller refetches and decides again.
    pub async fn try_update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: RepoStatus,
        expected_version: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE repositories
               SET status = $1, version = version + 1, updated_at = $2
               WHERE id = $3 AND version = $4 AND deleted_at IS NULL"#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .bind(expected_version)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_primary_language(
        pool: &SqlitePool,
        id: Uuid,
        language: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE repositories SET primary_language = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(language)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_update_checked(
        pool: &SqlitePool,
        id: Uuid,
        checked_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE repositories SET last_update_check_at = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(checked_at)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn soft_delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE repositories SET deleted_at = $1, updated_at = $1
               WHERE id = $2 AND deleted_at IS NULL"#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Whether a scheduled update check is due. The per-repository interval
    /// is floored at `min_interval_minutes`.
    pub fn update_due(
        &self,
        now: DateTime<Utc>,
        default_interval_minutes: i64,
        min_interval_minutes: i64,
    ) -> bool {
        let interval = self
            .update_interval_minutes
            .unwrap_or(default_interval_minutes)
            .max(min_interval_minutes);
        match self.last_update_check_at {
            None => true,
            Some(checked_at) => checked_at + Duration::minutes(interval) <= now,
        }
    }
}
