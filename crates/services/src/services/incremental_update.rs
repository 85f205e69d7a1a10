use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use db::{
    DBService,
    models::{
        branch_language::BranchLanguage, repository::Repository,
        repository_branch::RepositoryBranch,
    },
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::{
    config::CoreConfig,
    generator::{GeneratorError, SubscriberNotifier, UpdateNotification, WikiGenerator},
    workspace::{RepositoryWorkspace, WorkspaceError, WorkspaceManager},
};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("repository not found: {0}")]
    RepositoryNotFound(Uuid),
    #[error("branch not found: {0}")]
    BranchNotFound(Uuid),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug)]
pub struct UpdateCheck {
    pub needs_update: bool,
    pub previous_commit_id: Option<String>,
    pub current_commit_id: String,
    pub changed_files: Vec<String>,
    pub workspace: RepositoryWorkspace,
}

#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub updated: bool,
    pub target_commit_id: Option<String>,
    pub languages_processed: usize,
    pub changed_files: usize,
    pub duration: Duration,
}

// Substrings in error messages that mean the on-disk tree is unusable and a
// fresh clone is the only way forward. libgit2 reports corruption through
// several error classes, so the message is the common denominator.
const CORRUPTION_KEYWORDS: [&str; 5] =
    ["corrupt", "invalid", "not a git repository", "bad object", "broken"];

pub(crate) fn is_corruption_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CORRUPTION_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Executes one incremental-update task end to end: diff the branch against
/// its recorded head, have the generator patch every language, advance the
/// branch, tell subscribers.
pub struct IncrementalUpdateService {
    db: DBService,
    config: Arc<CoreConfig>,
    workspaces: Arc<WorkspaceManager>,
    generator: Arc<dyn WikiGenerator>,
    notifier: Arc<dyn SubscriberNotifier>,
}

impl IncrementalUpdateService {
    pub fn new(
        db: DBService,
        config: Arc<CoreConfig>,
        workspaces: Arc<WorkspaceManager>,
        generator: Arc<dyn WikiGenerator>,
        notifier: Arc<dyn SubscriberNotifier>,
    ) -> Self {
        IncrementalUpdateService {
            db,
            config,
            workspaces,
            generator,
            notifier,
        }
    }

    /// Prepare the branch workspace and report whether the remote moved past
    /// the branch's recorded head. An empty recorded head always needs an
    /// update (first pass).
    pub async fn check_for_updates(
        &self,
        repository_id: Uuid,
        branch_id: Uuid,
    ) -> Result<UpdateCheck, UpdateError> {
        let repository = Repository::find_by_id(&self.db.pool, repository_id)
            .await?
            .ok_or(UpdateError::RepositoryNotFound(repository_id))?;
        let branch = RepositoryBranch::find_by_id(&self.db.pool, branch_id)
            .await?
            .ok_or(UpdateError::BranchNotFound(branch_id))?;

        let workspace = self.prepare_with_recovery(&repository, &branch).await?;

        let previous = branch.last_commit_id.clone().filter(|commit| !commit.is_empty());
        let needs_update = previous.as_deref() != Some(workspace.commit_id.as_str());

        let changed_files = if needs_update {
            self.workspaces
                .changed_files(&workspace, previous.as_deref(), &workspace.commit_id)
                .await?
        } else {
            Vec::new()
        };

        Ok(UpdateCheck {
            needs_update,
            previous_commit_id: previous,
            current_commit_id: workspace.commit_id.clone(),
            changed_files,
            workspace,
        })
    }

    pub async fn process_incremental_update(
        &self,
        repository_id: Uuid,
        branch_id: Uuid,
    ) -> Result<UpdateOutcome, UpdateError> {
        let started = Instant::now();
        let check = self.check_for_updates(repository_id, branch_id).await?;

        if !check.needs_update {
            return Ok(UpdateOutcome {
                duration: started.elapsed(),
                ..UpdateOutcome::default()
            });
        }

        info!(
            "Updating {}/{} branch {} from {:?} to {} ({} changed files)",
            check.workspace.org_name,
            check.workspace.repo_name,
            check.workspace.branch_name,
            check.previous_commit_id,
            check.current_commit_id,
            check.changed_files.len()
        );

        let languages = BranchLanguage::find_by_branch_id(&self.db.pool, branch_id).await?;
        for language in &languages {
            self.generator
                .incremental_update(&check.workspace, &language.language_code, &check.changed_files)
                .await?;
        }

        let now = Utc::now();
        RepositoryBranch::advance_commit(
            &self.db.pool,
            branch_id,
            &check.current_commit_id,
            now,
        )
        .await?;
        Repository::mark_update_checked(&self.db.pool, repository_id, now).await?;

        let notification = UpdateNotification {
            repository_id,
            org_name: check.workspace.org_name.clone(),
            repo_name: check.workspace.repo_name.clone(),
            branch_name: check.workspace.branch_name.clone(),
            previous_commit_id: check.previous_commit_id.clone(),
            current_commit_id: check.current_commit_id.clone(),
            changed_files: check.changed_files.len(),
            languages: languages.len(),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            // Best effort only; a notification failure never fails the task.
            warn!("Subscriber notification failed for {repository_id}: {e}");
        }

        Ok(UpdateOutcome {
            updated: true,
            target_commit_id: Some(check.current_commit_id),
            languages_processed: languages.len(),
            changed_files: check.changed_files.len(),
            duration: started.elapsed(),
        })
    }

    /// Workspace preparation with corruption recovery. Distinct from the
    /// manager's fixed-delay transport retry: this loop backs off
    /// exponentially and wipes the tree between attempts when the failure
    /// smells like a broken object store.
    async fn prepare_with_recovery(
        &self,
        repository: &Repository,
        branch: &RepositoryBranch,
    ) -> Result<RepositoryWorkspace, UpdateError> {
        let previous = branch.last_commit_id.clone().filter(|commit| !commit.is_empty());
        let max_attempts = self.config.max_retry_attempts.max(1);

        let mut attempt = 1u32;
        loop {
            match self
                .workspaces
                .prepare(repository, &branch.branch_name, previous.clone())
                .await
            {
                Ok(workspace) => return Ok(workspace),
                Err(err) => {
                    if attempt >= max_attempts {
                        return Err(err.into());
                    }
                    if is_corruption_message(&err.to_string()) {
                        warn!(
                            "Workspace for {}/{} looks corrupt ({err}), removing tree before retry",
                            repository.org_name, repository.repo_name
                        );
                        if let Err(remove_err) = self
                            .workspaces
                            .remove_tree(&repository.org_name, &repository.repo_name)
                            .await
                        {
                            warn!("Failed to remove corrupt tree: {remove_err}");
                        }
                    }
                    let delay = Duration::from_millis(
                        self.config
                            .retry_base_delay_ms
                            .saturating_mul(1u64 << (attempt - 1)),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_keywords_match_case_insensitively() {
        assert!(is_corruption_message("bad object HEAD"));
        assert!(is_corruption_message("object store is CORRUPT"));
        assert!(is_corruption_message("path is Not a Git Repository"));
        assert!(is_corruption_message("invalid tree entry"));
        assert!(is_corruption_message("index file is broken"));
        assert!(!is_corruption_message("connection timed out"));
    }
}
