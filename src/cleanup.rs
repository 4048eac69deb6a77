//! Archive or delete messages listed in an export manifest

use indicatif::ProgressBar;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::manifest::{self, ProcessedItemRecord};
use crate::metrics::RunMetrics;
use crate::pool::{BatchResult, WorkerPool};
use crate::shutdown::ShutdownSignal;

/// Label removed to archive a message
pub const INBOX_LABEL: &str = "INBOX";

/// Metrics file written next to the manifest after a cleanup
pub const CLEANUP_METRICS_FILE_NAME: &str = "cleanup_metrics.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupAction {
    /// Remove the message from the inbox, keeping it in All Mail
    #[default]
    Archive,
    /// Permanently delete the message
    Delete,
}

impl CleanupAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupAction::Archive => "archive",
            CleanupAction::Delete => "delete",
        }
    }
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupAction {
    type Err = GmailError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" => Ok(CleanupAction::Archive),
            "delete" => Ok(CleanupAction::Delete),
            other => Err(GmailError::Validation(format!(
                "invalid cleanup action: {} (valid: archive, delete)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub manifest_path: PathBuf,
    pub action: CleanupAction,
    /// Log what would happen without calling the API
    pub dry_run: bool,
    /// Maximum items to process; `Some(0)` is treated as no limit
    pub limit: Option<usize>,
    pub parallel_workers: usize,
    pub write_metrics: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            manifest_path: manifest::manifest_path(&PathBuf::from("./exports")),
            action: CleanupAction::default(),
            dry_run: false,
            limit: None,
            parallel_workers: 3,
            write_metrics: true,
        }
    }
}

pub struct Cleaner {
    client: Arc<dyn GmailClient>,
    config: CleanupConfig,
    progress: Option<ProgressBar>,
    shutdown: Option<ShutdownSignal>,
}

impl Cleaner {
    pub fn new(client: Arc<dyn GmailClient>, config: CleanupConfig) -> Self {
        Self {
            client,
            config,
            progress: None,
            shutdown: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Apply the configured action to every manifest entry.
    ///
    /// `total_bytes` is the exported size of the messages handled.
    pub async fn cleanup(&self) -> Result<BatchResult<u64>> {
        let mut records = manifest::load(&self.config.manifest_path).await?;
        let matched = records.len();
        info!(
            "Loaded {} messages from manifest {:?}",
            matched, self.config.manifest_path
        );

        if let Some(limit) = self.config.limit.filter(|&l| l > 0) {
            records.truncate(limit);
        }

        if self.config.dry_run {
            info!(
                "DRY RUN: no messages will be changed ({} would be {}d)",
                records.len(),
                self.config.action
            );
        } else if self.config.action == CleanupAction::Delete {
            warn!(
                "Permanently deleting {} messages; this cannot be undone",
                records.len()
            );
        }

        let client = Arc::clone(&self.client);
        let action = self.config.action;
        let dry_run = self.config.dry_run;

        let handler = move |record: ProcessedItemRecord| {
            let client = Arc::clone(&client);
            async move { clean_message(client.as_ref(), action, dry_run, record).await }
        };

        let mut result = self.pool().run(records, handler).await;
        result.total_matched = matched;

        if self.config.write_metrics && !self.config.dry_run {
            let path = self
                .config
                .manifest_path
                .with_file_name(CLEANUP_METRICS_FILE_NAME);
            if let Err(e) = RunMetrics::from_batch("cleanup", &result).save(&path).await {
                warn!("Failed to write metrics {:?}: {}", path, e);
            }
        }

        Ok(result)
    }

    fn pool(&self) -> WorkerPool {
        let mut pool = WorkerPool::new(self.config.parallel_workers);
        if let Some(pb) = &self.progress {
            pool = pool.with_progress(pb.clone());
        }
        if let Some(signal) = &self.shutdown {
            pool = pool.with_shutdown(signal.clone());
        }
        pool
    }
}

async fn clean_message(
    client: &dyn GmailClient,
    action: CleanupAction,
    dry_run: bool,
    record: ProcessedItemRecord,
) -> Result<u64> {
    if dry_run {
        info!("DRY RUN: would {} message {}", action, record.id);
        return Ok(record.size);
    }

    match action {
        CleanupAction::Archive => {
            client
                .modify_labels(&record.id, &[], &[INBOX_LABEL.to_string()])
                .await?
        }
        CleanupAction::Delete => client.delete_message(&record.id).await?,
    }

    debug!("{}d message {}", action, record.id);
    Ok(record.size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            "archive".parse::<CleanupAction>().unwrap(),
            CleanupAction::Archive
        );
        assert_eq!(
            "DELETE".parse::<CleanupAction>().unwrap(),
            CleanupAction::Delete
        );
    }

    #[test]
    fn test_invalid_action_is_validation_error() {
        let err = "archivex".parse::<CleanupAction>().unwrap_err();
        assert!(matches!(err, GmailError::Validation(_)));
        assert!(err.to_string().contains("archivex"));
        assert!("".parse::<CleanupAction>().is_err());
    }

    #[test]
    fn test_action_display() {
        assert_eq!(CleanupAction::Archive.to_string(), "archive");
        assert_eq!(CleanupAction::Delete.to_string(), "delete");
        assert_eq!(CleanupAction::default(), CleanupAction::Archive);
    }
}
