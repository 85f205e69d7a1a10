use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UpdateTaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct UpdateTask {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub branch_id: Uuid,
    /// The branch head at the moment the task was created, not at execution.
    pub previous_commit_id: Option<String>,
    pub target_commit_id: Option<String>,
    pub status: UpdateTaskStatus,
    pub priority: i64,
    pub is_manual_trigger: bool,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateUpdateTask {
    pub repository_id: Uuid,
    pub branch_id: Uuid,
    pub previous_commit_id: Option<String>,
    pub priority: i64,
    pub is_manual_trigger: bool,
}

impl UpdateTask {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateUpdateTask,
        task_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, UpdateTask>(
            r#"INSERT INTO update_tasks (
                   id, repository_id, branch_id, previous_commit_id,
                   target_commit_id, status, priority, is_manual_trigger,
                   retry_count, error_message, created_at, started_at, completed_at
               )
               VALUES ($1, $2, $3, $4, NULL, $5, $6, $7, 0, NULL, $8, NULL, NULL)
               RETURNING *"#,
        )
        .bind(task_id)
        .bind(data.repository_id)
        .bind(data.branch_id)
        .bind(&data.previous_commit_id)
        .bind(UpdateTaskStatus::Pending)
        .bind(data.priority)
        .bind(data.is_manual_trigger)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UpdateTask>("SELECT * FROM update_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The at-most-one live task per (repository, branch) check.
    pub async fn find_active_for_branch(
        pool: &SqlitePool,
        repository_id: Uuid,
        branch_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, UpdateTask>(
            r#"SELECT * FROM update_tasks
               WHERE repository_id = $1 AND branch_id = $2
                 AND status IN ('pending', 'processing')
               LIMIT 1"#,
        )
        .bind(repository_id)
        .bind(branch_id)
        .fetch_optional(pool)
        .await
    }

    /// Drain order: highest priority first, ties broken by age.
    pub async fn find_pending(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, UpdateTask>(
            r#"SELECT * FROM update_tasks
               WHERE status = 'pending'
               ORDER BY priority DESC, created_at ASC"#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn mark_processing(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE update_tasks SET status = $1, started_at = $2 WHERE id = $3",
        )
        .bind(UpdateTaskStatus::Processing)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(
        pool: &SqlitePool,
        id: Uuid,
        target_commit_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE update_tasks
               SET status = $1, target_commit_id = $2, completed_at = $3
               WHERE id = $4"#,
        )
        .bind(UpdateTaskStatus::Completed)
        .bind(target_commit_id)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// `retry_count` is observability only; there is no retry edge back to
    /// pending, operators re-trigger manually.
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: Uuid,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE update_tasks
               SET status = $1, error_message = $2, retry_count = retry_count + 1,
                   completed_at = $3
               WHERE id = $4"#,
        )
        .bind(UpdateTaskStatus::Failed)
        .bind(error_message)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Startup sweep: tasks stranded in `processing` by a dead scheduler
    /// instance go back to `pending`.
    pub async fn reset_stale_processing(
        pool: &SqlitePool,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<u64, sqlx::Error> {
        let cutoff = now - stale_after;
        let result = sqlx::query(
            r#"UPDATE update_tasks
               SET status = $1, started_at = NULL
               WHERE status = 'processing' AND started_at IS NOT NULL AND started_at <= $2"#,
        )
        .bind(UpdateTaskStatus::Pending)
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
