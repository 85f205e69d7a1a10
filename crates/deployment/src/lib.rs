use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use db::{
    DBService,
    models::{
        repository::{RepoStatus, Repository},
        update_task::UpdateTask,
    },
};
use services::services::{
    config::{ConfigError, CoreConfig},
    processing_log::ProcessingLogService,
    processing_worker::ProcessingWorker,
    update_scheduler::UpdateScheduler,
    workspace::WorkspaceManager,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// A task still marked processing this long after it started belongs to a
// dead instance; nothing in this process runs before the sweep.
const STALE_TASK_THRESHOLD_MINUTES: i64 = 10;

#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>;

    fn config(&self) -> &Arc<CoreConfig>;

    fn db(&self) -> &DBService;

    fn workspaces(&self) -> &Arc<WorkspaceManager>;

    fn processing_logs(&self) -> &ProcessingLogService;

    fn worker(&self) -> &Arc<ProcessingWorker>;

    fn scheduler(&self) -> &Arc<UpdateScheduler>;

    fn shutdown_token(&self) -> &CancellationToken;

    /// Startup sweep: heal rows stranded by a previous instance. Tasks stuck
    /// in `processing` go back to `pending`, and repositories a dead worker
    /// left mid-flight are re-queued.
    async fn recover_interrupted(&self) -> Result<(), DeploymentError> {
        let reset = UpdateTask::reset_stale_processing(
            &self.db().pool,
            Utc::now(),
            Duration::minutes(STALE_TASK_THRESHOLD_MINUTES),
        )
        .await?;
        if reset > 0 {
            tracing::info!("Reset {reset} stale update tasks to pending");
        }

        for repository in Repository::find_processing(&self.db().pool).await? {
            tracing::info!(
                "Found orphaned repository {} in processing, resetting to pending",
                repository.id
            );
            if !Repository::try_update_status(
                &self.db().pool,
                repository.id,
                RepoStatus::Pending,
                repository.version,
            )
            .await?
            {
                tracing::warn!(
                    "Repository {} moved while being recovered; leaving as is",
                    repository.id
                );
            }
        }
        Ok(())
    }

    /// Start the long-lived background services. They all observe the shared
    /// cancellation token and drain within seconds of it firing.
    fn spawn_background_services(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.worker().clone().spawn(self.shutdown_token().clone()),
            self.scheduler().clone().spawn(self.shutdown_token().clone()),
        ]
    }
}
