//! Export messages matching a filter to local files

use chrono::Utc;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::{list_all_message_ids, GmailClient};
use crate::error::{GmailError, Result};
use crate::formats::{parse_headers, ExportFormat};
use crate::manifest::{self, write_private, ProcessedItemRecord};
use crate::metrics::{RunMetrics, METRICS_FILE_NAME};
use crate::models::{MessageFormat, RemoteMessage};
use crate::pool::{BatchResult, WorkerPool};
use crate::query::FilterSpec;
use crate::shutdown::ShutdownSignal;

/// Subdirectory for messages without labels when organizing by label
pub const UNLABELED_DIR: &str = "unlabeled";

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub format: ExportFormat,
    /// Place each message under a directory named after its first label
    pub organize_by_labels: bool,
    /// Maximum items to process; `Some(0)` is treated as no limit
    pub limit: Option<usize>,
    pub parallel_workers: usize,
    pub write_metrics: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./exports"),
            format: ExportFormat::default(),
            organize_by_labels: false,
            limit: None,
            parallel_workers: 3,
            write_metrics: true,
        }
    }
}

pub struct Exporter {
    client: Arc<dyn GmailClient>,
    config: ExportConfig,
    progress: Option<ProgressBar>,
    shutdown: Option<ShutdownSignal>,
}

impl Exporter {
    pub fn new(client: Arc<dyn GmailClient>, config: ExportConfig) -> Self {
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

    /// Search, then fetch and write every match.
    ///
    /// Invalid filters and setup problems (output directory, search) are
    /// returned as errors; per-message problems end up in the result.
    /// Shutdown during a multi-page search yields `OperationCancelled`.
    pub async fn export(&self, filter: &FilterSpec) -> Result<BatchResult<ProcessedItemRecord>> {
        filter.validate()?;
        let query = filter.build_query();

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                GmailError::Setup(format!(
                    "Failed to create output directory {:?}: {}",
                    self.config.output_dir, e
                ))
            })?;

        if query.is_empty() {
            info!("Searching all messages");
        } else {
            info!("Searching messages: {}", query);
        }

        let mut ids = list_all_message_ids(self.client.as_ref(), &query, self.shutdown.as_ref())
            .await
            .map_err(|e| match e {
                GmailError::OperationCancelled(_) => e,
                e => GmailError::Setup(format!("Search failed: {}", e)),
            })?;
        let matched = ids.len();

        if let Some(limit) = self.config.limit.filter(|&l| l > 0) {
            if ids.len() > limit {
                info!("Limiting export to {} of {} messages", limit, matched);
                ids.truncate(limit);
            }
        }

        let client = Arc::clone(&self.client);
        let output_dir = self.config.output_dir.clone();
        let format = self.config.format;
        let organize = self.config.organize_by_labels;

        let handler = move |id: String| {
            let client = Arc::clone(&client);
            let output_dir = output_dir.clone();
            async move { export_message(client.as_ref(), &output_dir, format, organize, &id).await }
        };

        let mut result = self.pool().run(ids, handler).await;
        result.total_matched = matched;

        if result.total_succeeded > 0 {
            let path = manifest::manifest_path(&self.config.output_dir);
            if let Err(e) = manifest::save(&path, &result.completed).await {
                warn!("Failed to write manifest {:?}: {}", path, e);
            }
        }

        if self.config.write_metrics {
            let path = self.config.output_dir.join(METRICS_FILE_NAME);
            if let Err(e) = RunMetrics::from_batch("export", &result).save(&path).await {
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

/// Where a message lands on disk
///
/// With label organization only the first label is used.
pub fn output_path(
    output_dir: &Path,
    message: &RemoteMessage,
    format: ExportFormat,
    organize_by_labels: bool,
) -> PathBuf {
    let file_name = format!("{}.{}", message.id, format.extension());

    if !organize_by_labels {
        return output_dir.join(file_name);
    }

    let dir = message
        .label_ids
        .first()
        .map(|label| sanitize_dir_name(label))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNLABELED_DIR.to_string());

    output_dir.join(dir).join(file_name)
}

fn sanitize_dir_name(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

async fn export_message(
    client: &dyn GmailClient,
    output_dir: &Path,
    format: ExportFormat,
    organize_by_labels: bool,
    id: &str,
) -> Result<ProcessedItemRecord> {
    let message = client.fetch_message(id, MessageFormat::Raw).await?;
    if message.raw.is_empty() {
        return Err(GmailError::InvalidMessageFormat(format!(
            "message {} has no raw content",
            id
        )));
    }

    let path = output_path(output_dir, &message, format, organize_by_labels);
    let contents = format.encode(&message)?;
    write_private(&path, &contents).await?;
    debug!("Exported {} to {:?}", id, path);

    let headers = parse_headers(&message.raw);
    Ok(ProcessedItemRecord {
        id: message.id,
        subject: headers.subject,
        from: headers.from,
        date: headers.date,
        size: contents.len() as u64,
        processed: Utc::now(),
    })
}
