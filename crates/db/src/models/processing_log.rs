use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStep {
    Workspace,
    Catalog,
    Content,
    Complete,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ProcessingLog {
    pub id: i64,
    pub repository_id: Uuid,
    pub step: ProcessingStep,
    pub message: String,
    pub is_ai_output: bool,
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLog {
    pub async fn append(
        pool: &SqlitePool,
        repository_id: Uuid,
        step: ProcessingStep,
        message: &str,
        is_ai_output: bool,
        tool_name: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO processing_logs (
                   repository_id, step, message, is_ai_output, tool_name, created_at
               )
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(repository_id)
        .bind(step)
        .bind(message)
        .bind(is_ai_output)
        .bind(tool_name)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// The newest `limit` entries, newest first. The `id` tiebreak keeps
    /// same-timestamp rows in insert order.
    pub async fn find_recent(
        pool: &SqlitePool,
        repository_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ProcessingLog>(
            r#"SELECT * FROM processing_logs
               WHERE repository_id = $1
                 AND ($2 IS NULL OR created_at > $2)
               ORDER BY created_at DESC, id DESC
               LIMIT $3"#,
        )
        .bind(repository_id)
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn clear(pool: &SqlitePool, repository_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM processing_logs WHERE repository_id = $1")
            .bind(repository_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
