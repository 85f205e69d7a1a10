use std::sync::Arc;

use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use services::services::{
    config::{CoreConfig, load_config_from_file, save_config_to_file},
    generator::{HttpWikiGenerator, SubscriberNotifier, WebhookNotifier, WikiGenerator},
    incremental_update::IncrementalUpdateService,
    platform_app::{ConfiguredInstallations, PlatformAppService},
    processing_log::ProcessingLogService,
    processing_worker::ProcessingWorker,
    update_scheduler::UpdateScheduler,
    workspace::WorkspaceManager,
};
use tokio_util::sync::CancellationToken;
use utils::assets::config_path;

/// Single-host deployment: one database, one storage root, one instance of
/// each background service.
#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<CoreConfig>,
    db: DBService,
    workspaces: Arc<WorkspaceManager>,
    processing_logs: ProcessingLogService,
    worker: Arc<ProcessingWorker>,
    scheduler: Arc<UpdateScheduler>,
    shutdown: CancellationToken,
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let raw_config = load_config_from_file(&config_path()).await;
        // Write the file back so a fresh install gets the defaults on disk.
        save_config_to_file(&raw_config, &config_path()).await?;
        let config = Arc::new(raw_config);

        let db = DBService::new().await?;

        let platform: Arc<dyn PlatformAppService> =
            Arc::new(ConfiguredInstallations::new(&config));
        let workspaces = Arc::new(WorkspaceManager::new(&config, platform));
        let processing_logs = ProcessingLogService::new(db.clone());

        let generator: Arc<dyn WikiGenerator> = Arc::new(HttpWikiGenerator::from_config(&config));
        let notifier: Arc<dyn SubscriberNotifier> = Arc::new(WebhookNotifier::from_config(&config));

        let updater = Arc::new(IncrementalUpdateService::new(
            db.clone(),
            config.clone(),
            workspaces.clone(),
            generator.clone(),
            notifier,
        ));
        let worker = Arc::new(ProcessingWorker::new(
            db.clone(),
            workspaces.clone(),
            generator,
            processing_logs.clone(),
        ));
        let scheduler = Arc::new(UpdateScheduler::new(db.clone(), config.clone(), updater));

        Ok(LocalDeployment {
            config,
            db,
            workspaces,
            processing_logs,
            worker,
            scheduler,
            shutdown: CancellationToken::new(),
        })
    }

    fn config(&self) -> &Arc<CoreConfig> {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    fn processing_logs(&self) -> &ProcessingLogService {
        &self.processing_logs
    }

    fn worker(&self) -> &Arc<ProcessingWorker> {
        &self.worker
    }

    fn scheduler(&self) -> &Arc<UpdateScheduler> {
        &self.scheduler
    }

    fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
