use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use db::{
    DBService,
    models::{
        branch_language::BranchLanguage,
        processing_log::ProcessingStep,
        repository::{CreateRepository, RepoStatus, Repository},
        repository_branch::RepositoryBranch,
    },
};
use git2::{IndexAddOption, RepositoryInitOptions};
use services::services::{
    config::CoreConfig,
    generator::{GeneratorError, WikiGenerator},
    platform_app::ConfiguredInstallations,
    processing_log::ProcessingLogService,
    processing_worker::ProcessingWorker,
    workspace::{RepositoryWorkspace, WorkspaceManager},
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
struct RecordingGenerator {
    calls: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WikiGenerator for RecordingGenerator {
    async fn generate_catalog(
        &self,
        _workspace: &RepositoryWorkspace,
        language_code: &str,
    ) -> Result<(), GeneratorError> {
        self.calls.lock().unwrap().push(format!("catalog:{language_code}"));
        Ok(())
    }

    async fn generate_documents(
        &self,
        _workspace: &RepositoryWorkspace,
        language_code: &str,
    ) -> Result<(), GeneratorError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("documents:{language_code}"));
        Ok(())
    }

    async fn incremental_update(
        &self,
        _workspace: &RepositoryWorkspace,
        language_code: &str,
        changed_files: &[String],
    ) -> Result<(), GeneratorError> {
        self.calls.lock().unwrap().push(format!(
            "incremental:{language_code}:{}",
            changed_files.len()
        ));
        Ok(())
    }
}

struct FailingGenerator;

#[async_trait]
impl WikiGenerator for FailingGenerator {
    async fn generate_catalog(
        &self,
        _workspace: &RepositoryWorkspace,
        _language_code: &str,
    ) -> Result<(), GeneratorError> {
        Err(GeneratorError::Rejected {
            status: 502,
            body: "model backend unavailable".to_string(),
        })
    }

    async fn generate_documents(
        &self,
        _workspace: &RepositoryWorkspace,
        _language_code: &str,
    ) -> Result<(), GeneratorError> {
        Err(GeneratorError::Rejected {
            status: 502,
            body: "model backend unavailable".to_string(),
        })
    }

    async fn incremental_update(
        &self,
        _workspace: &RepositoryWorkspace,
        _language_code: &str,
        _changed_files: &[String],
    ) -> Result<(), GeneratorError> {
        Err(GeneratorError::Rejected {
            status: 502,
            body: "model backend unavailable".to_string(),
        })
    }
}

fn write_file<P: AsRef<Path>>(base: P, rel: &str, content: &str) {
    let path = base.as_ref().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn init_origin(dir: &Path) -> git2::Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = git2::Repository::init_opts(dir, &opts).unwrap();
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test User").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();
    repo
}

fn commit_all(repo: &git2::Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let signature = repo.signature().unwrap();
    let parents = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => vec![],
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
        .unwrap()
}

async fn test_db(td: &TempDir) -> DBService {
    let url = format!("sqlite://{}", td.path().join("test.sqlite").display());
    DBService::from_url(&url).await.unwrap()
}

fn test_config(storage_root: PathBuf) -> Arc<CoreConfig> {
    Arc::new(CoreConfig {
        repositories_dir: storage_root,
        retry_delay_ms: 10,
        retry_base_delay_ms: 10,
        ..CoreConfig::default()
    })
}

async fn seed_repository(db: &DBService, remote_url: &str) -> (Repository, RepositoryBranch) {
    let repository = Repository::create(
        &db.pool,
        &CreateRepository {
            owner_id: "owner-1".to_string(),
            remote_url: remote_url.to_string(),
            org_name: "acme".to_string(),
            repo_name: "widgets".to_string(),
            is_public: true,
            auth_account: None,
            auth_secret: None,
            update_interval_minutes: None,
        },
        Uuid::new_v4(),
    )
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

fn worker(db: &DBService, config: &Arc<CoreConfig>, generator: Arc<dyn WikiGenerator>) -> ProcessingWorker {
    let platform = Arc::new(ConfiguredInstallations::new(config));
    let workspaces = Arc::new(WorkspaceManager::new(config, platform));
    ProcessingWorker::new(
        db.clone(),
        workspaces,
        generator,
        ProcessingLogService::new(db.clone()),
    )
}

#[tokio::test]
async fn first_full_pass_completes_and_advances_the_branch() {
    let td = TempDir::new().unwrap();
    let origin_dir = td.path().join("origin");
    let origin = init_origin(&origin_dir);
    write_file(&origin_dir, "src/app.ts", &"export const x = 1;\n".repeat(50));
    write_file(&origin_dir, "src/util.ts", &"export const y = 2;\n".repeat(20));
    write_file(&origin_dir, "setup.py", "print('small')\n");
    let head = commit_all(&origin, "seed");

    let db = test_db(&td).await;
    let config = test_config(td.path().join("store"));
    let (repository, branch) = seed_repository(&db, &origin_dir.to_string_lossy()).await;

    let generator = Arc::new(RecordingGenerator::default());
    let worker = worker(&db, &config, generator.clone());
    worker
        .process_backlog(&CancellationToken::new())
        .await
        .unwrap();

    let repository = Repository::find_by_id(&db.pool, repository.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repository.status, RepoStatus::Completed);
    assert_eq!(repository.primary_language.as_deref(), Some("TypeScript"));

    let branch = RepositoryBranch::find_by_id(&db.pool, branch.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch.last_commit_id.as_deref(), Some(head.to_string().as_str()));
    assert!(branch.last_processed_at.is_some());

    assert_eq!(generator.calls(), vec!["catalog:en", "documents:en"]);

    let view = ProcessingLogService::new(db.clone())
        .get_logs(repository.id, None, None)
        .await
        .unwrap();
    assert_eq!(view.current_step, ProcessingStep::Complete);
    assert!(view.started_at.is_some());
    let steps: Vec<ProcessingStep> = view.logs.iter().map(|entry| entry.step).collect();
    assert_eq!(
        steps,
        vec![
            ProcessingStep::Workspace,
            ProcessingStep::Workspace,
            ProcessingStep::Workspace,
            ProcessingStep::Catalog,
            ProcessingStep::Content,
            ProcessingStep::Complete,
        ]
    );
    assert!(view.logs[1].message.contains("Workspace ready at commit"));
    assert!(
        view.logs[2]
            .message
            .contains("Detected primary programming language: TypeScript")
    );
}

#[tokio::test]
async fn generator_failure_marks_the_repository_failed() {
    let td = TempDir::new().unwrap();
    let origin_dir = td.path().join("origin");
    let origin = init_origin(&origin_dir);
    write_file(&origin_dir, "src/app.ts", "export const x = 1;\n");
    commit_all(&origin, "seed");

    let db = test_db(&td).await;
    let config = test_config(td.path().join("store"));
    let (repository, branch) = seed_repository(&db, &origin_dir.to_string_lossy()).await;

    let worker = worker(&db, &config, Arc::new(FailingGenerator));
    worker
        .process_backlog(&CancellationToken::new())
        .await
        .unwrap();

    let repository = Repository::find_by_id(&db.pool, repository.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repository.status, RepoStatus::Failed);

    // No partial progress: the branch head never advanced.
    let branch = RepositoryBranch::find_by_id(&db.pool, branch.id)
        .await
        .unwrap()
        .unwrap();
    assert!(branch.last_commit_id.is_none());

    let view = ProcessingLogService::new(db.clone())
        .get_logs(repository.id, None, None)
        .await
        .unwrap();
    let last = view.logs.last().unwrap();
    assert_eq!(last.step, ProcessingStep::Complete);
    assert!(last.message.contains("Processing failed"));
}

#[tokio::test]
async fn cancellation_rolls_the_repository_back_to_pending() {
    let td = TempDir::new().unwrap();
    let origin_dir = td.path().join("origin");
    let origin = init_origin(&origin_dir);
    write_file(&origin_dir, "src/app.ts", "export const x = 1;\n");
    commit_all(&origin, "seed");

    let db = test_db(&td).await;
    let config = test_config(td.path().join("store"));
    let (repository, _branch) = seed_repository(&db, &origin_dir.to_string_lossy()).await;

    let generator = Arc::new(RecordingGenerator::default());
    let worker = worker(&db, &config, generator.clone());

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    worker
        .process_repository(repository.clone(), &shutdown)
        .await
        .unwrap();

    let repository = Repository::find_by_id(&db.pool, repository.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repository.status, RepoStatus::Pending, "no state leak");
    assert!(generator.calls().is_empty());
}
