use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    branch_language::BranchLanguage,
    repository::{CreateRepository, RepoStatus, Repository, RepositoryError},
    repository_branch::RepositoryBranch,
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::{git_url::parse_org_and_name, response::ApiResponse};
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize, TS)]
pub struct SubmitRepositoryRequest {
    pub remote_url: String,
    pub owner_id: String,
    #[serde(default = "default_branch_name")]
    pub branch_name: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default)]
    pub is_public: bool,
    pub auth_account: Option<String>,
    pub auth_secret: Option<String>,
    pub update_interval_minutes: Option<i64>,
}

fn default_branch_name() -> String {
    "main".to_string()
}

fn default_language_code() -> String {
    "en".to_string()
}

#[derive(Debug, Serialize, TS)]
pub struct SubmittedRepository {
    pub repository: Repository,
    pub branch: RepositoryBranch,
}

#[derive(Debug, Serialize, TS)]
pub struct TriggeredTask {
    pub task_id: Uuid,
}

pub async fn submit_repository(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<SubmitRepositoryRequest>,
) -> Result<ResponseJson<ApiResponse<SubmittedRepository>>, ApiError> {
    let (org_name, repo_name) = parse_org_and_name(&payload.remote_url)
        .ok_or_else(|| RepositoryError::InvalidRemoteUrl(payload.remote_url.clone()))?;

    tracing::debug!(
        "Submitting repository {org_name}/{repo_name} for owner {}",
        payload.owner_id
    );

    let pool = &deployment.db().pool;
    // A duplicate live remote URL fails here, before any child rows exist.
    let repository = Repository::create(
        pool,
        &CreateRepository {
            owner_id: payload.owner_id,
            remote_url: payload.remote_url,
            org_name,
            repo_name,
            is_public: payload.is_public,
            auth_account: payload.auth_account,
            auth_secret: payload.auth_secret,
            update_interval_minutes: payload.update_interval_minutes,
        },
        Uuid::new_v4(),
    )
    .await?;

    let branch = RepositoryBranch::create(
        pool,
        repository.id,
        &payload.branch_name,
        Uuid::new_v4(),
    )
    .await?;
    BranchLanguage::create(pool, branch.id, &payload.language_code, true, Uuid::new_v4())
        .await?;

    Ok(ResponseJson(ApiResponse::success(SubmittedRepository {
        repository,
        branch,
    })))
}

pub async fn list_repositories(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Repository>>>, ApiError> {
    let repositories = Repository::find_live(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(repositories)))
}

pub async fn delete_repository(
    State(deployment): State<DeploymentImpl>,
    Path(repository_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let rows_affected = Repository::soft_delete(&deployment.db().pool, repository_id).await?;
    if rows_affected == 0 {
        return Err(ApiError::NotFound("repository"));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

/// Clear logs and push the repository back to `pending`; the processing
/// worker picks it up on its next scan.
pub async fn regenerate_repository(
    State(deployment): State<DeploymentImpl>,
    Path(repository_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Repository>>, ApiError> {
    let pool = &deployment.db().pool;
    deployment.processing_logs().clear_logs(repository_id).await?;

    for _ in 0..3 {
        let repository = Repository::find_by_id(pool, repository_id)
            .await?
            .ok_or(ApiError::NotFound("repository"))?;
        if Repository::try_update_status(
            pool,
            repository_id,
            RepoStatus::Pending,
            repository.version,
        )
        .await?
        {
            let repository = Repository::find_by_id(pool, repository_id)
                .await?
                .ok_or(ApiError::NotFound("repository"))?;
            return Ok(ResponseJson(ApiResponse::success(repository)));
        }
    }
    Err(ApiError::Conflict(
        "repository is being modified concurrently".to_string(),
    ))
}

pub async fn trigger_branch_update(
    State(deployment): State<DeploymentImpl>,
    Path((repository_id, branch_id)): Path<(Uuid, Uuid)>,
) -> Result<ResponseJson<ApiResponse<TriggeredTask>>, ApiError> {
    let task_id = deployment
        .scheduler()
        .trigger_manual_update(repository_id, branch_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(TriggeredTask { task_id })))
}

pub fn router() -> Router<DeploymentImpl> {
    let repository_id_router = Router::new()
        .route("/", axum::routing::delete(delete_repository))
        .route("/regenerate", post(regenerate_repository))
        .route("/branches/{branch_id}/update", post(trigger_branch_update));

    let inner = Router::new()
        .route("/", get(list_repositories).post(submit_repository))
        .nest("/{repository_id}", repository_id_router);

    Router::new().nest("/repositories", inner)
}
