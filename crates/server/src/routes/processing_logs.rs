use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use chrono::{DateTime, Utc};
use db::models::repository::Repository;
use deployment::Deployment;
use serde::Deserialize;
use services::services::processing_log::LogView;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Polling surface for clients rendering processing progress.
pub async fn get_processing_logs(
    State(deployment): State<DeploymentImpl>,
    Path((owner, repo_name)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<ResponseJson<ApiResponse<LogView>>, ApiError> {
    let repository = Repository::find_by_org_and_name(&deployment.db().pool, &owner, &repo_name)
        .await?
        .ok_or(ApiError::NotFound("repository"))?;

    let view = deployment
        .processing_logs()
        .get_logs(repository.id, query.since, query.limit)
        .await?;
    Ok(ResponseJson(ApiResponse::success(view)))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/{owner}/{repo_name}/processing-logs", get(get_processing_logs))
}
