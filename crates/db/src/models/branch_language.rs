use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct BranchLanguage {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub language_code: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BranchLanguage {
    pub async fn create(
        pool: &SqlitePool,
        branch_id: Uuid,
        language_code: &str,
        is_default: bool,
        language_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, BranchLanguage>(
            r#"INSERT INTO branch_languages (
                   id, branch_id, language_code, is_default, created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING *"#,
        )
        .bind(language_id)
        .bind(branch_id)
        .bind(language_code)
        .bind(is_default)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Languages of one branch in their stored order.
    pub async fn find_by_branch_id(
        pool: &SqlitePool,
        branch_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, BranchLanguage>(
            r#"SELECT * FROM branch_languages
               WHERE branch_id = $1
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(branch_id)
        .fetch_all(pool)
        .await
    }
}
