use std::{sync::Arc, time::Duration};

use chrono::Utc;
use db::{
    DBService,
    models::{
        repository::Repository,
        repository_branch::RepositoryBranch,
        update_task::{CreateUpdateTask, UpdateTask},
    },
};
use thiserror::Error;
use tokio::{task::JoinHandle, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::services::{config::CoreConfig, incremental_update::IncrementalUpdateService};

const SCHEDULED_REPOSITORIES_PER_TICK: usize = 10;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("branch {0} does not belong to repository {1}")]
    BranchMismatch(Uuid, Uuid),
    #[error("branch not found: {0}")]
    BranchNotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Polls the task queue and the update calendar. Each tick first drains
/// pending tasks in priority order, then emits scheduled tasks for
/// repositories whose check interval has elapsed.
pub struct UpdateScheduler {
    db: DBService,
    config: Arc<CoreConfig>,
    updater: Arc<IncrementalUpdateService>,
    poll_interval: Duration,
}

impl UpdateScheduler {
    pub fn new(
        db: DBService,
        config: Arc<CoreConfig>,
        updater: Arc<IncrementalUpdateService>,
    ) -> Self {
        let poll_interval = Duration::from_secs(config.polling_interval_seconds.max(1));
        UpdateScheduler {
            db,
            config,
            updater,
            poll_interval,
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.start(shutdown).await })
    }

    async fn start(&self, shutdown: CancellationToken) {
        info!(
            "Starting incremental update scheduler with interval {:?}",
            self.poll_interval
        );
        let mut ticker = interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Update scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(&shutdown).await {
                        error!("Scheduler tick failed: {e}");
                    }
                }
            }
        }
    }

    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<(), SchedulerError> {
        self.drain_pending(shutdown).await?;
        if !shutdown.is_cancelled() {
            self.emit_scheduled().await?;
        }
        Ok(())
    }

    /// Execute every pending task, highest priority first, one at a time.
    /// A cancellation mid-task deliberately leaves the row `processing`;
    /// the startup sweep heals it on the next instance.
    pub async fn drain_pending(&self, shutdown: &CancellationToken) -> Result<(), SchedulerError> {
        let pending = UpdateTask::find_pending(&self.db.pool).await?;
        if pending.is_empty() {
            debug!("No pending update tasks");
            return Ok(());
        }

        info!("Draining {} pending update tasks", pending.len());
        for task in pending {
            if shutdown.is_cancelled() {
                break;
            }
            UpdateTask::mark_processing(&self.db.pool, task.id).await?;

            let work = self
                .updater
                .process_incremental_update(task.repository_id, task.branch_id);
            tokio::pin!(work);
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = &mut work => result,
            };

            match outcome {
                Ok(result) => {
                    UpdateTask::mark_completed(
                        &self.db.pool,
                        task.id,
                        result.target_commit_id.as_deref(),
                    )
                    .await?;
                    info!(
                        "Update task {} completed in {:?} ({} languages, {} changed files)",
                        task.id, result.duration, result.languages_processed, result.changed_files
                    );
                }
                Err(err) => {
                    error!("Update task {} failed: {err}", task.id);
                    UpdateTask::mark_failed(&self.db.pool, task.id, &err.to_string()).await?;
                }
            }
        }
        Ok(())
    }

    /// Emit scheduled tasks for up to ten due repositories, skipping any
    /// (repository, branch) pair that already has a live task.
    pub async fn emit_scheduled(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        let candidates = Repository::find_completed(&self.db.pool).await?;
        let due = candidates
            .into_iter()
            .filter(|repository| {
                repository.update_due(
                    now,
                    self.config.default_update_interval_minutes,
                    self.config.min_update_interval_minutes,
                )
            })
            .take(SCHEDULED_REPOSITORIES_PER_TICK);

        for repository in due {
            let branches =
                RepositoryBranch::find_by_repository_id(&self.db.pool, repository.id).await?;
            for branch in branches {
                if UpdateTask::find_active_for_branch(&self.db.pool, repository.id, branch.id)
                    .await?
                    .is_some()
                {
                    continue;
                }
                let task = UpdateTask::create(
                    &self.db.pool,
                    &CreateUpdateTask {
                        repository_id: repository.id,
                        branch_id: branch.id,
                        previous_commit_id: branch.last_commit_id.clone(),
                        priority: 0,
                        is_manual_trigger: false,
                    },
                    Uuid::new_v4(),
                )
                .await?;
                debug!(
                    "Scheduled update task {} for {}/{} branch {}",
                    task.id, repository.org_name, repository.repo_name, branch.branch_name
                );
            }
            Repository::mark_update_checked(&self.db.pool, repository.id, now).await?;
        }
        Ok(())
    }

    /// Manual trigger: reuses the live task for the pair when one exists,
    /// otherwise enqueues at elevated priority. Priority is the only thing
    /// that floats a manual task above scheduled ones.
    pub async fn trigger_manual_update(
        &self,
        repository_id: Uuid,
        branch_id: Uuid,
    ) -> Result<Uuid, SchedulerError> {
        let branch = RepositoryBranch::find_by_id(&self.db.pool, branch_id)
            .await?
            .ok_or(SchedulerError::BranchNotFound(branch_id))?;
        if branch.repository_id != repository_id {
            return Err(SchedulerError::BranchMismatch(branch_id, repository_id));
        }

        if let Some(existing) =
            UpdateTask::find_active_for_branch(&self.db.pool, repository_id, branch_id).await?
        {
            return Ok(existing.id);
        }

        let task = UpdateTask::create(
            &self.db.pool,
            &CreateUpdateTask {
                repository_id,
                branch_id,
                previous_commit_id: branch.last_commit_id.clone(),
                priority: self.config.manual_trigger_priority,
                is_manual_trigger: true,
            },
            Uuid::new_v4(),
        )
        .await?;
        info!(
            "Manual update task {} queued for branch {}",
            task.id, branch.branch_name
        );
        Ok(task.id)
    }
}
