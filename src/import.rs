//! Re-insert exported files into a mailbox

use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::client::GmailClient;
use crate::error::{GmailError, Result};
use crate::formats::ExportFormat;
use crate::manifest::MANIFEST_FILE_NAME;
use crate::metrics::RunMetrics;
use crate::pool::{BatchResult, WorkerPool};
use crate::shutdown::ShutdownSignal;

/// Metrics file written into the input directory after an import
pub const IMPORT_METRICS_FILE_NAME: &str = "import_metrics.json";

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub input_dir: PathBuf,
    pub parallel_workers: usize,
    /// Maximum items to process; `Some(0)` is treated as no limit
    pub limit: Option<usize>,
    pub write_metrics: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./exports"),
            parallel_workers: 3,
            limit: None,
            write_metrics: true,
        }
    }
}

pub struct Importer {
    client: Arc<dyn GmailClient>,
    config: ImportConfig,
    progress: Option<ProgressBar>,
    shutdown: Option<ShutdownSignal>,
}

impl Importer {
    pub fn new(client: Arc<dyn GmailClient>, config: ImportConfig) -> Self {
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

    /// Import every exported file under the input directory.
    ///
    /// Each file is one work item; an mbox file holding several messages
    /// fails as a whole if any of them is rejected.
    pub async fn import(&self) -> Result<BatchResult<u64>> {
        let input_dir = &self.config.input_dir;
        if !input_dir.is_dir() {
            return Err(GmailError::Setup(format!(
                "Input directory does not exist: {:?}",
                input_dir
            )));
        }

        let mut files = discover_files(input_dir)?;
        let found = files.len();
        info!("Found {} files to import in {:?}", found, input_dir);

        if let Some(limit) = self.config.limit.filter(|&l| l > 0) {
            files.truncate(limit);
        }

        let client = Arc::clone(&self.client);
        let handler = move |path: PathBuf| {
            let client = Arc::clone(&client);
            async move { import_file(client.as_ref(), &path).await }
        };

        let mut result = self.pool().run(files, handler).await;
        result.total_matched = found;

        if self.config.write_metrics {
            let path = input_dir.join(IMPORT_METRICS_FILE_NAME);
            if let Err(e) = RunMetrics::from_batch("import", &result).save(&path).await {
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

/// Importable files below `dir`, sorted by path
///
/// Manifests and metrics written by this tool are skipped.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry =
            entry.map_err(|e| GmailError::Setup(format!("Failed to scan {:?}: {}", dir, e)))?;
        if !entry.file_type().is_file() || ExportFormat::from_path(entry.path()).is_none() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name == MANIFEST_FILE_NAME || name.ends_with("metrics.json") {
            continue;
        }

        files.push(entry.into_path());
    }

    Ok(files)
}

async fn import_file(client: &dyn GmailClient, path: &Path) -> Result<u64> {
    let format = ExportFormat::from_path(path).ok_or_else(|| {
        GmailError::InvalidMessageFormat(format!("unsupported file type: {:?}", path))
    })?;

    let contents = tokio::fs::read(path).await?;
    let messages = format.decode(&contents)?;

    for raw in &messages {
        let id = client.import_message(raw).await?;
        debug!("Imported {:?} as message {}", path, id);
    }

    Ok(contents.len() as u64)
}
