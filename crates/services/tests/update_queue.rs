use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use db::{
    DBService,
    models::{
        branch_language::BranchLanguage,
        repository::{CreateRepository, RepoStatus, Repository, RepositoryError},
        repository_branch::RepositoryBranch,
        update_task::{CreateUpdateTask, UpdateTask, UpdateTaskStatus},
    },
};
use services::services::{
    config::CoreConfig,
    generator::{
        GeneratorError, NotifierError, SubscriberNotifier, UpdateNotification, WikiGenerator,
    },
    incremental_update::IncrementalUpdateService,
    platform_app::ConfiguredInstallations,
    update_scheduler::UpdateScheduler,
    workspace::{RepositoryWorkspace, WorkspaceManager},
};
use tempfile::TempDir;
use uuid::Uuid;

struct NoopGenerator;

#[async_trait]
impl WikiGenerator for NoopGenerator {
    async fn generate_catalog(
        &self,
        _workspace: &RepositoryWorkspace,
        _language_code: &str,
    ) -> Result<(), GeneratorError> {
        Ok(())
    }

    async fn generate_documents(
        &self,
        _workspace: &RepositoryWorkspace,
        _language_code: &str,
    ) -> Result<(), GeneratorError> {
        Ok(())
    }

    async fn incremental_update(
        &self,
        _workspace: &RepositoryWorkspace,
        _language_code: &str,
        _changed_files: &[String],
    ) -> Result<(), GeneratorError> {
        Ok(())
    }
}

struct NoopNotifier;

#[async_trait]
impl SubscriberNotifier for NoopNotifier {
    async fn notify(&self, _notification: &UpdateNotification) -> Result<(), NotifierError> {
        Ok(())
    }
}

async fn test_db(td: &TempDir) -> DBService {
    let url = format!("sqlite://{}", td.path().join("test.sqlite").display());
    DBService::from_url(&url).await.unwrap()
}

fn test_config(td: &TempDir) -> Arc<CoreConfig> {
    Arc::new(CoreConfig {
        repositories_dir: td.path().join("store"),
        retry_delay_ms: 10,
        retry_base_delay_ms: 10,
        ..CoreConfig::default()
    })
}

fn scheduler(db: &DBService, config: Arc<CoreConfig>) -> UpdateScheduler {
    let platform = Arc::new(ConfiguredInstallations::new(&config));
    let workspaces = Arc::new(WorkspaceManager::new(&config, platform));
    let updater = Arc::new(IncrementalUpdateService::new(
        db.clone(),
        config.clone(),
        workspaces,
        Arc::new(NoopGenerator),
        Arc::new(NoopNotifier),
    ));
    UpdateScheduler::new(db.clone(), config, updater)
}

fn create_request(remote_url: &str, repo_name: &str) -> CreateRepository {
    CreateRepository {
        owner_id: "owner-1".to_string(),
        remote_url: remote_url.to_string(),
        org_name: "acme".to_string(),
        repo_name: repo_name.to_string(),
        is_public: true,
        auth_account: None,
        auth_secret: None,
        update_interval_minutes: None,
    }
}

async fn seed_repository(db: &DBService, remote_url: &str) -> (Repository, RepositoryBranch) {
    let repository = Repository::create(&db.pool, &create_request(remote_url, "widgets"), Uuid::new_v4())
        .await
        .unwrap();
    let branch = RepositoryBranch::create(&db.pool, repository.id, "main", Uuid::new_v4())
        .await
        .unwrap();
    BranchLanguage::create(&db.pool, branch.id, "en", true, Uuid::new_v4())
        .await
        .unwrap();
    (repository, branch)
}

async fn force_status(db: &DBService, repository_id: Uuid, status: RepoStatus) {
    let repository = Repository::find_by_id(&db.pool, repository_id)
        .await
        .unwrap()
        .unwrap();
    assert!(
        Repository::try_update_status(&db.pool, repository_id, status, repository.version)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn duplicate_submission_is_rejected_without_new_rows() {
    let td = TempDir::new().unwrap();
    let db = test_db(&td).await;

    let (repository, _branch) = seed_repository(&db, "https://example.com/acme/widgets.git").await;

    let result = Repository::create(
        &db.pool,
        &create_request("https://example.com/acme/widgets.git", "widgets"),
        Uuid::new_v4(),
    )
    .await;
    assert!(matches!(result, Err(RepositoryError::DuplicateRemoteUrl)));

    let live = Repository::find_live(&db.pool).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, repository.id);

    // A soft-deleted row frees the remote URL for resubmission.
    Repository::soft_delete(&db.pool, repository.id).await.unwrap();
    Repository::create(
        &db.pool,
        &create_request("https://example.com/acme/widgets.git", "widgets"),
        Uuid::new_v4(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn manual_trigger_outranks_scheduled_tasks() {
    let td = TempDir::new().unwrap();
    let db = test_db(&td).await;
    let config = test_config(&td);

    let (repository, branch_a) = seed_repository(&db, "https://example.com/acme/widgets.git").await;
    let branch_b = RepositoryBranch::create(&db.pool, repository.id, "develop", Uuid::new_v4())
        .await
        .unwrap();

    let scheduled = UpdateTask::create(
        &db.pool,
        &CreateUpdateTask {
            repository_id: repository.id,
            branch_id: branch_a.id,
            previous_commit_id: None,
            priority: 0,
            is_manual_trigger: false,
        },
        Uuid::new_v4(),
    )
    .await
    .unwrap();

    let scheduler = scheduler(&db, config);
    let manual_id = scheduler
        .trigger_manual_update(repository.id, branch_b.id)
        .await
        .unwrap();

    let pending = UpdateTask::find_pending(&db.pool).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, manual_id, "manual trigger drains first");
    assert_eq!(pending[0].priority, 100);
    assert!(pending[0].is_manual_trigger);
    assert_eq!(pending[1].id, scheduled.id);
}

#[tokio::test]
async fn manual_trigger_reuses_the_live_task() {
    let td = TempDir::new().unwrap();
    let db = test_db(&td).await;
    let config = test_config(&td);

    let (repository, branch) = seed_repository(&db, "https://example.com/acme/widgets.git").await;
    let scheduler = scheduler(&db, config);

    let first = scheduler
        .trigger_manual_update(repository.id, branch.id)
        .await
        .unwrap();
    let second = scheduler
        .trigger_manual_update(repository.id, branch.id)
        .await
        .unwrap();

    assert_eq!(first, second);
    let pending = UpdateTask::find_pending(&db.pool).await.unwrap();
    assert_eq!(pending.len(), 1, "at most one live task per branch");
}

#[tokio::test]
async fn task_pins_the_commit_observed_at_creation() {
    let td = TempDir::new().unwrap();
    let db = test_db(&td).await;
    let config = test_config(&td);

    let (repository, branch) = seed_repository(&db, "https://example.com/acme/widgets.git").await;
    RepositoryBranch::advance_commit(&db.pool, branch.id, "f00ba12aa", Utc::now())
        .await
        .unwrap();

    let scheduler = scheduler(&db, config);
    let task_id = scheduler
        .trigger_manual_update(repository.id, branch.id)
        .await
        .unwrap();

    // The branch moves on after the task was cut; the snapshot must not.
    RepositoryBranch::advance_commit(&db.pool, branch.id, "baddcafe11", Utc::now())
        .await
        .unwrap();

    let task = UpdateTask::find_by_id(&db.pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.previous_commit_id.as_deref(), Some("f00ba12aa"));
}

#[tokio::test]
async fn emit_scheduled_is_idempotent_per_interval() {
    let td = TempDir::new().unwrap();
    let db = test_db(&td).await;
    let config = test_config(&td);

    let (repository, _branch) = seed_repository(&db, "https://example.com/acme/widgets.git").await;
    force_status(&db, repository.id, RepoStatus::Completed).await;

    let scheduler = scheduler(&db, config);
    scheduler.emit_scheduled().await.unwrap();

    let pending = UpdateTask::find_pending(&db.pool).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].priority, 0);
    assert!(!pending[0].is_manual_trigger);

    let checked = Repository::find_by_id(&db.pool, repository.id)
        .await
        .unwrap()
        .unwrap();
    assert!(checked.last_update_check_at.is_some());

    // Interval unmet: a second pass emits nothing new.
    scheduler.emit_scheduled().await.unwrap();
    assert_eq!(UpdateTask::find_pending(&db.pool).await.unwrap().len(), 1);

    // Interval elapsed but the first task is still live: still nothing new.
    Repository::mark_update_checked(&db.pool, repository.id, Utc::now() - Duration::hours(2))
        .await
        .unwrap();
    scheduler.emit_scheduled().await.unwrap();
    assert_eq!(UpdateTask::find_pending(&db.pool).await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_due_respects_interval_and_floor() {
    let td = TempDir::new().unwrap();
    let db = test_db(&td).await;

    let (repository, _branch) = seed_repository(&db, "https://example.com/acme/widgets.git").await;
    let t0 = Utc::now();

    let mut repository = repository;
    repository.update_interval_minutes = Some(60);
    repository.last_update_check_at = None;
    assert!(repository.update_due(t0, 60, 5), "never checked means due");

    repository.last_update_check_at = Some(t0);
    assert!(!repository.update_due(t0 + Duration::minutes(30), 60, 5));
    assert!(repository.update_due(t0 + Duration::minutes(61), 60, 5));

    // A one-minute interval is floored at the configured minimum.
    repository.update_interval_minutes = Some(1);
    assert!(!repository.update_due(t0 + Duration::minutes(2), 60, 5));
    assert!(repository.update_due(t0 + Duration::minutes(6), 60, 5));
}

#[tokio::test]
async fn stale_processing_tasks_reset_to_pending() {
    let td = TempDir::new().unwrap();
    let db = test_db(&td).await;

    let (repository, branch) = seed_repository(&db, "https://example.com/acme/widgets.git").await;
    let task = UpdateTask::create(
        &db.pool,
        &CreateUpdateTask {
            repository_id: repository.id,
            branch_id: branch.id,
            previous_commit_id: None,
            priority: 0,
            is_manual_trigger: false,
        },
        Uuid::new_v4(),
    )
    .await
    .unwrap();
    UpdateTask::mark_processing(&db.pool, task.id).await.unwrap();

    // Young enough: the sweep leaves it alone.
    let reset = UpdateTask::reset_stale_processing(&db.pool, Utc::now(), Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(reset, 0);

    // Pretend the instance died long ago.
    let reset = UpdateTask::reset_stale_processing(
        &db.pool,
        Utc::now() + Duration::minutes(30),
        Duration::minutes(10),
    )
    .await
    .unwrap();
    assert_eq!(reset, 1);

    let task = UpdateTask::find_by_id(&db.pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, UpdateTaskStatus::Pending);
    assert!(task.started_at.is_none());
}
