use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::services::{config::CoreConfig, workspace::RepositoryWorkspace};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("no generator endpoint configured")]
    EndpointMissing,
    #[error("generator rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// The wiki generator as seen from the core: three long-running calls that
/// persist their own output. The core only hands over a workspace handle.
#[async_trait]
pub trait WikiGenerator: Send + Sync {
    /// Full pass, catalog stage.
    async fn generate_catalog(
        &self,
        workspace: &RepositoryWorkspace,
        language_code: &str,
    ) -> Result<(), GeneratorError>;

    /// Full pass, content stage.
    async fn generate_documents(
        &self,
        workspace: &RepositoryWorkspace,
        language_code: &str,
    ) -> Result<(), GeneratorError>;

    /// Diff-driven pass restricted to the changed-file set.
    async fn incremental_update(
        &self,
        workspace: &RepositoryWorkspace,
        language_code: &str,
        changed_files: &[String],
    ) -> Result<(), GeneratorError>;
}

#[derive(Debug, Serialize)]
struct GeneratorRequest<'a> {
    org_name: &'a str,
    repo_name: &'a str,
    branch_name: &'a str,
    remote_url: &'a str,
    working_dir: String,
    commit_id: &'a str,
    language_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed_files: Option<&'a [String]>,
}

impl<'a> GeneratorRequest<'a> {
    fn new(
        workspace: &'a RepositoryWorkspace,
        language_code: &'a str,
        changed_files: Option<&'a [String]>,
    ) -> Self {
        GeneratorRequest {
            org_name: &workspace.org_name,
            repo_name: &workspace.repo_name,
            branch_name: &workspace.branch_name,
            remote_url: &workspace.remote_url,
            working_dir: workspace.working_dir.to_string_lossy().into_owned(),
            commit_id: &workspace.commit_id,
            language_code,
            changed_files,
        }
    }
}

/// Generator client forwarding each stage to the configured endpoint.
pub struct HttpWikiGenerator {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpWikiGenerator {
    pub fn from_config(config: &CoreConfig) -> Self {
        HttpWikiGenerator {
            client: reqwest::Client::new(),
            endpoint: config.generator_endpoint.clone(),
        }
    }

    async fn post(
        &self,
        stage: &str,
        request: &GeneratorRequest<'_>,
    ) -> Result<(), GeneratorError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(GeneratorError::EndpointMissing)?;
        let url = format!("{}/{stage}", endpoint.trim_end_matches('/'));

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WikiGenerator for HttpWikiGenerator {
    async fn generate_catalog(
        &self,
        workspace: &RepositoryWorkspace,
        language_code: &str,
    ) -> Result<(), GeneratorError> {
        self.post("catalog", &GeneratorRequest::new(workspace, language_code, None))
            .await
    }

    async fn generate_documents(
        &self,
        workspace: &RepositoryWorkspace,
        language_code: &str,
    ) -> Result<(), GeneratorError> {
        self.post("documents", &GeneratorRequest::new(workspace, language_code, None))
            .await
    }

    async fn incremental_update(
        &self,
        workspace: &RepositoryWorkspace,
        language_code: &str,
        changed_files: &[String],
    ) -> Result<(), GeneratorError> {
        self.post(
            "incremental",
            &GeneratorRequest::new(workspace, language_code, Some(changed_files)),
        )
        .await
    }
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct UpdateNotification {
    pub repository_id: Uuid,
    pub org_name: String,
    pub repo_name: String,
    pub branch_name: String,
    pub previous_commit_id: Option<String>,
    pub current_commit_id: String,
    pub changed_files: usize,
    pub languages: usize,
}

/// Fire-and-forget subscriber notification; failures never fail the task
/// that produced the update.
#[async_trait]
pub trait SubscriberNotifier: Send + Sync {
    async fn notify(&self, notification: &UpdateNotification) -> Result<(), NotifierError>;
}

/// Webhook notifier; silently does nothing when no URL is configured.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn from_config(config: &CoreConfig) -> Self {
        WebhookNotifier {
            client: reqwest::Client::new(),
            url: config.webhook_url.clone(),
        }
    }
}

#[async_trait]
impl SubscriberNotifier for WebhookNotifier {
    async fn notify(&self, notification: &UpdateNotification) -> Result<(), NotifierError> {
        let Some(url) = self.url.as_deref() else {
            return Ok(());
        };
        self.client
            .post(url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
