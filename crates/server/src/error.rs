use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::repository::RepositoryError;
use deployment::DeploymentError;
use services::services::{
    generator::GeneratorError, incremental_update::UpdateError, update_scheduler::SchedulerError,
    workspace::WorkspaceError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Repository(RepositoryError::DuplicateRemoteUrl) => {
                (StatusCode::CONFLICT, "RepositoryError")
            }
            ApiError::Repository(RepositoryError::InvalidRemoteUrl(_)) => {
                (StatusCode::BAD_REQUEST, "RepositoryError")
            }
            ApiError::Repository(_) => (StatusCode::INTERNAL_SERVER_ERROR, "RepositoryError"),
            ApiError::Workspace(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WorkspaceError"),
            ApiError::Scheduler(SchedulerError::BranchNotFound(_)) => {
                (StatusCode::NOT_FOUND, "SchedulerError")
            }
            ApiError::Scheduler(SchedulerError::BranchMismatch(_, _)) => {
                (StatusCode::BAD_REQUEST, "SchedulerError")
            }
            ApiError::Scheduler(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SchedulerError"),
            ApiError::Update(UpdateError::RepositoryNotFound(_))
            | ApiError::Update(UpdateError::BranchNotFound(_)) => {
                (StatusCode::NOT_FOUND, "UpdateError")
            }
            ApiError::Update(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UpdateError"),
            ApiError::Generator(_) => (StatusCode::INTERNAL_SERVER_ERROR, "GeneratorError"),
            ApiError::Deployment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DeploymentError"),
            ApiError::Database(sqlx::Error::RowNotFound) => {
                (StatusCode::NOT_FOUND, "DatabaseError")
            }
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IoError"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
        };

        let error_message = format!("{}: {}", error_type, self);
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}
