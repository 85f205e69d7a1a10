use std::collections::HashMap;

use async_trait::async_trait;

use crate::services::config::CoreConfig;

/// Source of platform-app installation tokens, consulted during credential
/// synthesis when a repository carries no credentials of its own.
#[async_trait]
pub trait PlatformAppService: Send + Sync {
    /// The installation token for an organization, or `None` when no
    /// installation record exists.
    async fn installation_token(&self, org_name: &str) -> Option<String>;
}

/// Installation records read from configuration at startup.
pub struct ConfiguredInstallations {
    installations: HashMap<String, String>,
}

impl ConfiguredInstallations {
    pub fn new(config: &CoreConfig) -> Self {
        ConfiguredInstallations {
            installations: config.app_installations.clone(),
        }
    }
}

#[async_trait]
impl PlatformAppService for ConfiguredInstallations {
    async fn installation_token(&self, org_name: &str) -> Option<String> {
        self.installations
            .get(org_name)
            .filter(|token| !token.is_empty())
            .cloned()
    }
}
