use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Startup configuration for the repository processing core. Every field is
/// optional in the file; missing fields take the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub repositories_dir: PathBuf,
    pub cleanup_after_processing: bool,
    pub max_retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub polling_interval_seconds: u64,
    pub default_update_interval_minutes: i64,
    pub min_update_interval_minutes: i64,
    pub retry_base_delay_ms: u64,
    pub manual_trigger_priority: i64,
    pub platform_token: Option<String>,
    /// Git transports accept any TLS certificate by default so clones keep
    /// working behind inspection proxies. Hardened deployments set false.
    pub accept_invalid_certs: bool,
    pub generator_endpoint: Option<String>,
    pub webhook_url: Option<String>,
    /// Platform-app installations: organization name to installation token.
    pub app_installations: HashMap<String, String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            repositories_dir: default_repositories_dir(),
            cleanup_after_processing: false,
            max_retry_attempts: 3,
            retry_delay_ms: 1000,
            polling_interval_seconds: 60,
            default_update_interval_minutes: 60,
            min_update_interval_minutes: 5,
            retry_base_delay_ms: 1000,
            manual_trigger_priority: 100,
            platform_token: None,
            accept_invalid_certs: true,
            generator_endpoint: None,
            webhook_url: None,
            app_installations: HashMap::new(),
        }
    }
}

fn default_repositories_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:\\data")
    } else {
        PathBuf::from("/data")
    }
}

/// Will always return a config, falling back to defaults when the file is
/// missing or unreadable.
pub async fn load_config_from_file(config_path: &PathBuf) -> CoreConfig {
    match std::fs::read_to_string(config_path) {
        Ok(raw_config) => match serde_json::from_str(&raw_config) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Config file is not valid JSON ({e}), using defaults");
                CoreConfig::default()
            }
        },
        Err(_) => {
            tracing::info!("No config file found, using defaults");
            CoreConfig::default()
        }
    }
}

pub async fn save_config_to_file(
    config: &CoreConfig,
    config_path: &PathBuf,
) -> Result<(), ConfigError> {
    let raw_config = serde_json::to_string_pretty(config)?;
    std::fs::write(config_path, raw_config)?;
    Ok(())
}
