use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cleanup::CleanupAction;
use crate::client::RetryPolicy;
use crate::error::{GmailError, Result};
use crate::formats::ExportFormat;
use crate::query::{FilterSpec, SEARCH_SCOPES};

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "gmail-exporter.toml";

/// Upper bound for any worker or request concurrency setting
pub const MAX_PARALLELISM: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
    #[serde(default)]
    pub filters: FilterDefaults,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
            token_file: default_token_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub organize_by_labels: bool,
    #[serde(default = "default_workers")]
    pub parallel_workers: usize,
    #[serde(default = "default_true")]
    pub write_metrics: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: default_format(),
            organize_by_labels: false,
            parallel_workers: default_workers(),
            write_metrics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    #[serde(default = "default_workers")]
    pub parallel_workers: usize,
    #[serde(default = "default_true")]
    pub write_metrics: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            parallel_workers: default_workers(),
            write_metrics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSettings {
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default = "default_workers")]
    pub parallel_workers: usize,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            action: default_action(),
            parallel_workers: default_workers(),
        }
    }
}

/// Filter values applied unless the command line overrides them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDefaults {
    #[serde(default = "default_true")]
    pub exclude_chats: bool,
    #[serde(default = "default_scope")]
    pub search_scope: String,
}

impl Default for FilterDefaults {
    fn default() -> Self {
        Self {
            exclude_chats: true,
            search_scope: default_scope(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_file() -> PathBuf {
    PathBuf::from(".gmail-exporter/token.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_format() -> String {
    "eml".to_string()
}

fn default_workers() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_action() -> String {
    "archive".to_string()
}

fn default_scope() -> String {
    "all_mail".to_string()
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

/// Reject worker counts outside 1..=MAX_PARALLELISM
pub fn check_parallelism(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(GmailError::ConfigError(format!(
            "{} must be at least 1",
            name
        )));
    }
    if value > MAX_PARALLELISM {
        return Err(GmailError::ConfigError(format!(
            "{} cannot exceed {} (Gmail API quota)",
            name, MAX_PARALLELISM
        )));
    }
    Ok(())
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.auth.credentials_file.as_os_str().is_empty() {
            return Err(GmailError::ConfigError(
                "auth.credentials_file cannot be empty".to_string(),
            ));
        }
        if self.auth.token_file.as_os_str().is_empty() {
            return Err(GmailError::ConfigError(
                "auth.token_file cannot be empty".to_string(),
            ));
        }

        check_parallelism("export.parallel_workers", self.export.parallel_workers)?;
        check_parallelism("import.parallel_workers", self.import.parallel_workers)?;
        check_parallelism("cleanup.parallel_workers", self.cleanup.parallel_workers)?;
        check_parallelism("api.max_concurrent_requests", self.api.max_concurrent_requests)?;

        if self.api.max_retries > 10 {
            return Err(GmailError::ConfigError(
                "api.max_retries cannot exceed 10".to_string(),
            ));
        }

        self.export_format()
            .map_err(|e| GmailError::ConfigError(format!("export.format: {}", e)))?;
        self.cleanup_action()
            .map_err(|e| GmailError::ConfigError(format!("cleanup.action: {}", e)))?;

        let scope = self.filters.search_scope.as_str();
        if scope != "all" && !SEARCH_SCOPES.contains(&scope) {
            return Err(GmailError::ConfigError(format!(
                "Invalid filters.search_scope: '{}'. Must be one of: {}",
                scope,
                SEARCH_SCOPES.join(", ")
            )));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    pub fn export_format(&self) -> Result<ExportFormat> {
        self.export.format.parse()
    }

    pub fn cleanup_action(&self) -> Result<CleanupAction> {
        self.cleanup.action.parse()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.api.max_retries,
            ..RetryPolicy::default()
        }
    }

    /// Filter spec seeded with the configured defaults
    pub fn base_filter(&self) -> FilterSpec {
        FilterSpec {
            exclude_chats: self.filters.exclude_chats,
            search_scope: Some(self.filters.search_scope.clone()),
            ..FilterSpec::default()
        }
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.auth.credentials_file, PathBuf::from("credentials.json"));
        assert_eq!(config.export.output_dir, PathBuf::from("./exports"));
        assert_eq!(config.export.format, "eml");
        assert!(!config.export.organize_by_labels);
        assert_eq!(config.export.parallel_workers, 3);
        assert_eq!(config.import.parallel_workers, 3);
        assert_eq!(config.cleanup.action, "archive");
        assert!(config.filters.exclude_chats);
        assert_eq!(config.filters.search_scope, "all_mail");
        assert_eq!(config.api.max_concurrent_requests, 10);
        assert_eq!(config.api.max_retries, 3);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_workers_bounds() {
        let mut config = Config::default();

        config.export.parallel_workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("export.parallel_workers must be at least 1"));

        config.export.parallel_workers = 51;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot exceed 50"));

        config.export.parallel_workers = 50;
        assert!(config.validate().is_ok());

        config.import.parallel_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_max_concurrent() {
        let mut config = Config::default();
        config.api.max_concurrent_requests = 0;
        assert!(config.validate().is_err());

        config.api.max_concurrent_requests = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_enumerations() {
        let mut config = Config::default();
        config.export.format = "pdf".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("export.format"));

        let mut config = Config::default();
        config.cleanup.action = "shred".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cleanup.action"));

        let mut config = Config::default();
        config.filters.search_scope = "archive".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid filters.search_scope"));

        config.filters.search_scope = "inbox".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_typed_accessors() {
        let mut config = Config::default();
        config.export.format = "mbox".to_string();
        config.cleanup.action = "delete".to_string();
        config.api.max_retries = 5;

        assert_eq!(config.export_format().unwrap(), ExportFormat::Mbox);
        assert_eq!(config.cleanup_action().unwrap(), CleanupAction::Delete);
        assert_eq!(config.retry_policy().max_retries, 5);

        let filter = config.base_filter();
        assert!(filter.exclude_chats);
        assert_eq!(filter.search_scope.as_deref(), Some("all_mail"));
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.export.parallel_workers, 3);
    }

    #[tokio::test]
    async fn test_load_invalid_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "this is not valid toml {[}]")
            .await
            .unwrap();

        let err = Config::load(temp_file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[tokio::test]
    async fn test_load_partial_config_fills_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let partial_config = r#"
[export]
format = "json"
parallel_workers = 8

[filters]
search_scope = "inbox"
"#;
        tokio::fs::write(temp_file.path(), partial_config).await.unwrap();

        let config = Config::load(temp_file.path()).await.unwrap();
        assert_eq!(config.export.format, "json");
        assert_eq!(config.export.parallel_workers, 8);
        assert_eq!(config.export.output_dir, PathBuf::from("./exports"));
        assert!(config.filters.exclude_chats);
        assert_eq!(config.filters.search_scope, "inbox");
        assert_eq!(config.cleanup.action, "archive");
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[import]\nparallel_workers = 99\n")
            .await
            .unwrap();

        assert!(Config::load(temp_file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_create_example_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILE);

        Config::create_example(&path).await.unwrap();
        let loaded = Config::load(&path).await.unwrap();
        assert_eq!(loaded.export.format, "eml");
        assert_eq!(loaded.api.max_concurrent_requests, 10);
    }
}
