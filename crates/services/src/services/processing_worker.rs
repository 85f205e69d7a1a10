use std::{sync::Arc, time::Duration};

use chrono::Utc;
use db::{
    DBService,
    models::{
        branch_language::BranchLanguage,
        processing_log::ProcessingStep,
        repository::{RepoStatus, Repository},
        repository_branch::RepositoryBranch,
    },
};
use thiserror::Error;
use tokio::{task::JoinHandle, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::services::{
    generator::{GeneratorError, WikiGenerator},
    language::detect_primary_language,
    processing_log::ProcessingLogService,
    workspace::{RepositoryWorkspace, WorkspaceError, WorkspaceManager},
};

pub const WORKER_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("task join error: {0}")]
    TaskJoin(String),
}

/// Drives submitted repositories from `pending` to a terminal status: one
/// repository at a time, branches and languages strictly sequential so the
/// log stream stays ordered and resource usage stays bounded.
pub struct ProcessingWorker {
    db: DBService,
    workspaces: Arc<WorkspaceManager>,
    generator: Arc<dyn WikiGenerator>,
    logs: ProcessingLogService,
    poll_interval: Duration,
}

impl ProcessingWorker {
    pub fn new(
        db: DBService,
        workspaces: Arc<WorkspaceManager>,
        generator: Arc<dyn WikiGenerator>,
        logs: ProcessingLogService,
    ) -> Self {
        ProcessingWorker {
            db,
            workspaces,
            generator,
            logs,
            poll_interval: WORKER_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.start(shutdown).await })
    }

    async fn start(&self, shutdown: CancellationToken) {
        info!(
            "Starting processing worker with interval {:?}",
            self.poll_interval
        );
        let mut ticker = interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Processing worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_backlog(&shutdown).await {
                        error!("Error draining repository backlog: {e}");
                    }
                }
            }
        }
    }

    /// One scan over the backlog, oldest submissions first.
    pub async fn process_backlog(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<(), WorkerError> {
        let backlog = Repository::find_to_process(&self.db.pool).await?;
        for repository in backlog {
            if shutdown.is_cancelled() {
                break;
            }
            self.process_repository(repository, shutdown).await?;
        }
        Ok(())
    }

    /// Drive one repository to `completed` or `failed`; a cancellation
    /// mid-flight rolls it back to `pending` for the next instance.
    pub async fn process_repository(
        &self,
        repository: Repository,
        shutdown: &CancellationToken,
    ) -> Result<(), WorkerError> {
        self.logs.clear_logs(repository.id).await?;
        if !Repository::try_update_status(
            &self.db.pool,
            repository.id,
            RepoStatus::Processing,
            repository.version,
        )
        .await?
        {
            // The row moved under us (regenerate or delete); the next scan
            // will pick up whatever state it landed in.
            return Ok(());
        }

        info!(
            "Processing repository {}/{}",
            repository.org_name, repository.repo_name
        );

        let pipeline = self.run_pipeline(&repository);
        tokio::pin!(pipeline);
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = &mut pipeline => Some(result),
        };

        match outcome {
            None => {
                info!(
                    "Cancelled while processing {}, resetting to pending",
                    repository.id
                );
                self.set_terminal_status(repository.id, RepoStatus::Pending)
                    .await
            }
            Some(Ok(())) => {
                self.logs
                    .log(
                        repository.id,
                        ProcessingStep::Complete,
                        "Processing completed",
                        false,
                        None,
                    )
                    .await;
                self.set_terminal_status(repository.id, RepoStatus::Completed)
                    .await
            }
            Some(Err(err)) => {
                error!("Repository {} failed: {err}", repository.id);
                self.logs
                    .log(
                        repository.id,
                        ProcessingStep::Complete,
                        &format!("Processing failed: {err}"),
                        false,
                        None,
                    )
                    .await;
                self.set_terminal_status(repository.id, RepoStatus::Failed)
                    .await
            }
        }
    }

    async fn run_pipeline(&self, repository: &Repository) -> Result<(), WorkerError> {
        let branches =
            RepositoryBranch::find_by_repository_id(&self.db.pool, repository.id).await?;
        for branch in branches {
            self.process_branch(repository, &branch).await?;
        }
        Ok(())
    }

    async fn process_branch(
        &self,
        repository: &Repository,
        branch: &RepositoryBranch,
    ) -> Result<(), WorkerError> {
        self.logs
            .log(
                repository.id,
                ProcessingStep::Workspace,
                &format!("Preparing workspace for branch {}", branch.branch_name),
                false,
                None,
            )
            .await;

        let workspace = self
            .workspaces
            .prepare(repository, &branch.branch_name, branch.last_commit_id.clone())
            .await?;

        self.logs
            .log(
                repository.id,
                ProcessingStep::Workspace,
                &format!("Workspace ready at commit {}", short_commit(&workspace.commit_id)),
                false,
                None,
            )
            .await;

        let result = self
            .process_branch_contents(repository, branch, &workspace)
            .await;
        // The working tree is released no matter how the branch ended.
        self.workspaces.cleanup(&workspace).await;
        result
    }

    async fn process_branch_contents(
        &self,
        repository: &Repository,
        branch: &RepositoryBranch,
        workspace: &RepositoryWorkspace,
    ) -> Result<(), WorkerError> {
        if repository.primary_language.is_none() {
            let dir = workspace.working_dir.clone();
            let detected = tokio::task::spawn_blocking(move || detect_primary_language(&dir))
                .await
                .map_err(|e| WorkerError::TaskJoin(e.to_string()))?;
            if let Some(language) = detected {
                Repository::set_primary_language(&self.db.pool, repository.id, &language)
                    .await?;
                self.logs
                    .log(
                        repository.id,
                        ProcessingStep::Workspace,
                        &format!("Detected primary programming language: {language}"),
                        false,
                        None,
                    )
                    .await;
            }
        }

        let languages = BranchLanguage::find_by_branch_id(&self.db.pool, branch.id).await?;

        if workspace.is_incremental() {
            let changed_files = self
                .workspaces
                .changed_files(
                    workspace,
                    workspace.previous_commit_id.as_deref(),
                    &workspace.commit_id,
                )
                .await?;
            self.logs
                .log(
                    repository.id,
                    ProcessingStep::Content,
                    &format!(
                        "Applying incremental update ({} changed files)",
                        changed_files.len()
                    ),
                    false,
                    None,
                )
                .await;
            for language in &languages {
                self.generator
                    .incremental_update(workspace, &language.language_code, &changed_files)
                    .await?;
            }
        } else {
            for language in &languages {
                self.logs
                    .log(
                        repository.id,
                        ProcessingStep::Catalog,
                        &format!("Generating catalog ({})", language.language_code),
                        false,
                        None,
                    )
                    .await;
                self.generator
                    .generate_catalog(workspace, &language.language_code)
                    .await?;
                self.logs
                    .log(
                        repository.id,
                        ProcessingStep::Content,
                        &format!("Generating documents ({})", language.language_code),
                        false,
                        None,
                    )
                    .await;
                self.generator
                    .generate_documents(workspace, &language.language_code)
                    .await?;
            }
        }

        // The head only advances once every language acknowledged the pass.
        RepositoryBranch::advance_commit(
            &self.db.pool,
            branch.id,
            &workspace.commit_id,
            Utc::now(),
        )
        .await?;
        Ok(())
    }

    /// Optimistic terminal write; refetches on version conflicts.
    async fn set_terminal_status(
        &self,
        repository_id: uuid::Uuid,
        status: RepoStatus,
    ) -> Result<(), WorkerError> {
        for _ in 0..3 {
            let Some(current) = Repository::find_by_id(&self.db.pool, repository_id).await?
            else {
                return Ok(());
            };
            if Repository::try_update_status(&self.db.pool, repository_id, status, current.version)
                .await?
            {
                return Ok(());
            }
        }
        warn!(
            "Gave up moving repository {repository_id} to {status:?} after repeated version conflicts"
        );
        Ok(())
    }
}

fn short_commit(commit_id: &str) -> &str {
    &commit_id[..commit_id.len().min(7)]
}
