//! Command-line interface and command runners

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth;
use crate::cleanup::{Cleaner, CleanupAction, CleanupConfig};
use crate::client::{GmailClient, ProductionGmailClient};
use crate::config::{check_parallelism, Config, DEFAULT_CONFIG_FILE};
use crate::error::{GmailError, Result};
use crate::export::{ExportConfig, Exporter};
use crate::formats::ExportFormat;
use crate::import::{ImportConfig, Importer};
use crate::manifest::{self, ProcessedItemRecord};
use crate::metrics::format_bytes;
use crate::pool::BatchResult;
use crate::query::{parse_date, parse_duration, parse_size, FilterSpec};
use crate::shutdown::ShutdownSignal;

#[derive(Parser, Debug)]
#[command(name = "gmail-exporter")]
#[command(version)]
#[command(about = "Export, import and clean up Gmail messages", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file (overrides auth.credentials_file)
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Path to token cache file (overrides auth.token_file)
    #[arg(long, global = true)]
    pub token_cache: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Export messages matching a filter to local files
    Export(ExportArgs),

    /// Import exported files back into the mailbox
    Import(ImportArgs),

    /// Archive or delete messages listed in an export manifest
    Cleanup(CleanupArgs),

    /// Rebuild the manifest of an existing export directory
    GenerateManifest {
        /// Export directory to scan (defaults to export.output_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Overwrite an existing manifest
        #[arg(long)]
        force: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Search criteria shared by commands that query the mailbox
#[derive(Args, Debug, Default, Clone)]
pub struct FilterArgs {
    #[arg(long)]
    pub from: Option<String>,

    #[arg(long)]
    pub to: Option<String>,

    #[arg(long)]
    pub subject: Option<String>,

    /// Words that must appear, space separated
    #[arg(long)]
    pub includes_words: Option<String>,

    /// Words that must not appear, space separated
    #[arg(long)]
    pub excludes_words: Option<String>,

    /// Minimum size, e.g. 500KB or 5MB
    #[arg(long)]
    pub size_greater_than: Option<String>,

    /// Maximum size, e.g. 10MB
    #[arg(long)]
    pub size_less_than: Option<String>,

    /// Relative window, e.g. 12h, 30d, 2w, 6m, 1y
    #[arg(long)]
    pub date_within: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub date_after: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub date_before: Option<String>,

    /// Only messages with attachments
    #[arg(long, conflicts_with = "no_attachment")]
    pub has_attachment: bool,

    /// Only messages without attachments
    #[arg(long)]
    pub no_attachment: bool,

    /// Include chat messages in the search
    #[arg(long)]
    pub include_chats: bool,

    /// Comma-separated label names
    #[arg(long)]
    pub labels: Option<String>,

    /// One of all_mail, inbox, sent, drafts, spam, trash
    #[arg(long)]
    pub search_scope: Option<String>,
}

impl FilterArgs {
    /// Apply command-line criteria on top of `base`
    pub fn to_filter_spec(&self, base: FilterSpec) -> Result<FilterSpec> {
        let mut spec = base;

        spec.from = self.from.clone().or(spec.from);
        spec.to = self.to.clone().or(spec.to);
        spec.subject = self.subject.clone().or(spec.subject);
        spec.includes_words = self.includes_words.clone().or(spec.includes_words);
        spec.excludes_words = self.excludes_words.clone().or(spec.excludes_words);
        spec.labels = self.labels.clone().or(spec.labels);

        if let Some(size) = &self.size_greater_than {
            spec.size_greater_than = Some(parse_size(size)?);
        }
        if let Some(size) = &self.size_less_than {
            spec.size_less_than = Some(parse_size(size)?);
        }
        if let Some(window) = &self.date_within {
            spec.date_within = Some(parse_duration(window)?);
        }
        if let Some(date) = &self.date_after {
            spec.date_after = Some(parse_date(date)?);
        }
        if let Some(date) = &self.date_before {
            spec.date_before = Some(parse_date(date)?);
        }

        if self.has_attachment {
            spec.has_attachment = Some(true);
        } else if self.no_attachment {
            spec.has_attachment = Some(false);
        }

        if self.include_chats {
            spec.exclude_chats = false;
        }
        if let Some(scope) = &self.search_scope {
            spec.search_scope = Some(scope.clone());
        }

        Ok(spec)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Output directory (defaults to export.output_dir)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// eml, json or mbox
    #[arg(short, long)]
    pub format: Option<String>,

    /// Place messages in per-label subdirectories
    #[arg(long)]
    pub organize_by_labels: bool,

    /// Process at most this many matches (0 = no limit)
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Skip writing metrics.json
    #[arg(long)]
    pub no_metrics: bool,
}

/// A limit of 0 means no limit
fn non_zero_limit(limit: Option<usize>) -> Option<usize> {
    limit.filter(|&l| l > 0)
}

impl ExportArgs {
    /// Resolve and validate everything an export needs before connecting
    pub fn prepare(&self, config: &Config) -> Result<(FilterSpec, ExportConfig)> {
        let filter = self.filter.to_filter_spec(config.base_filter())?;
        filter.validate()?;
        let export_config = self.export_config(config)?;
        Ok((filter, export_config))
    }

    pub fn export_config(&self, config: &Config) -> Result<ExportConfig> {
        let format = match &self.format {
            Some(format) => format.parse::<ExportFormat>()?,
            None => config.export_format()?,
        };
        let parallel_workers = self.workers.unwrap_or(config.export.parallel_workers);
        check_parallelism("--workers", parallel_workers)?;

        Ok(ExportConfig {
            output_dir: self
                .output_dir
                .clone()
                .unwrap_or_else(|| config.export.output_dir.clone()),
            format,
            organize_by_labels: self.organize_by_labels || config.export.organize_by_labels,
            limit: non_zero_limit(self.limit),
            parallel_workers,
            write_metrics: config.export.write_metrics && !self.no_metrics,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Directory containing exported files
    #[arg(short, long)]
    pub input_dir: PathBuf,

    /// Import at most this many files (0 = no limit)
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Skip writing import_metrics.json
    #[arg(long)]
    pub no_metrics: bool,
}

impl ImportArgs {
    pub fn import_config(&self, config: &Config) -> Result<ImportConfig> {
        let parallel_workers = self.workers.unwrap_or(config.import.parallel_workers);
        check_parallelism("--workers", parallel_workers)?;

        Ok(ImportConfig {
            input_dir: self.input_dir.clone(),
            parallel_workers,
            limit: non_zero_limit(self.limit),
            write_metrics: config.import.write_metrics && !self.no_metrics,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// Manifest to read (defaults to the one in export.output_dir)
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// archive or delete
    #[arg(short, long)]
    pub action: Option<String>,

    /// Show what would be done without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Process at most this many manifest entries (0 = no limit)
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Skip writing cleanup_metrics.json
    #[arg(long)]
    pub no_metrics: bool,
}

impl CleanupArgs {
    pub fn cleanup_config(&self, config: &Config) -> Result<CleanupConfig> {
        let action = match &self.action {
            Some(action) => action.parse::<CleanupAction>()?,
            None => config.cleanup_action()?,
        };
        let parallel_workers = self.workers.unwrap_or(config.cleanup.parallel_workers);
        check_parallelism("--workers", parallel_workers)?;

        Ok(CleanupConfig {
            manifest_path: self
                .manifest
                .clone()
                .unwrap_or_else(|| manifest::manifest_path(&config.export.output_dir)),
            action,
            dry_run: self.dry_run,
            limit: non_zero_limit(self.limit),
            parallel_workers,
            write_metrics: !self.no_metrics,
        })
    }
}

impl Cli {
    pub fn credentials_path(&self, config: &Config) -> PathBuf {
        self.credentials
            .clone()
            .unwrap_or_else(|| config.auth.credentials_file.clone())
    }

    pub fn token_cache_path(&self, config: &Config) -> PathBuf {
        self.token_cache
            .clone()
            .unwrap_or_else(|| config.auth.token_file.clone())
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Bar whose length is set by the worker pool once the batch is known
    pub fn add_progress_bar(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        self.println(&format!("  ✓ {}", msg));
    }

    pub fn println(&self, msg: &str) {
        if self.multi.println(msg).is_err() {
            println!("{}", msg);
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }
}

/// Human-readable end-of-run report
pub fn format_summary<O>(title: &str, result: &BatchResult<O>) -> String {
    let mut lines = vec![
        "========================================".to_string(),
        format!("{} Summary", title),
        "========================================".to_string(),
        format!("Matched:   {}", result.total_matched),
        format!("Succeeded: {}", result.total_succeeded),
        format!("Failed:    {}", result.total_failed),
        format!("Size:      {}", format_bytes(result.total_bytes)),
        format!("Duration:  {:.1}s", result.duration.as_secs_f64()),
    ];

    if result.cancelled {
        lines.push("Cancelled before all items were processed".to_string());
    }

    if result.has_failures() {
        lines.push(String::new());
        lines.push("Failures:".to_string());
        for failure in result.failures.iter().take(10) {
            lines.push(format!("  - {}: {}", failure.item, failure.error));
        }
        if result.failures.len() > 10 {
            lines.push(format!("  ... and {} more", result.failures.len() - 10));
        }
    }

    lines.push("========================================".to_string());
    lines.join("\n")
}

/// Authenticate and build the rate-limited production client
pub async fn connect(
    cli: &Cli,
    config: &Config,
    reporter: &ProgressReporter,
) -> Result<Arc<dyn GmailClient>> {
    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials_path(config), &cli.token_cache_path(config))
        .await?;
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

    let client = ProductionGmailClient::new(hub, config.api.max_concurrent_requests)
        .with_retry_policy(config.retry_policy());
    Ok(Arc::new(client))
}

pub async fn run_export(
    client: Arc<dyn GmailClient>,
    filter: &FilterSpec,
    export_config: ExportConfig,
    reporter: &ProgressReporter,
    shutdown: ShutdownSignal,
) -> Result<BatchResult<ProcessedItemRecord>> {
    info!(
        "Exporting to {:?} as {} with {} workers",
        export_config.output_dir, export_config.format, export_config.parallel_workers
    );

    let pb = reporter.add_progress_bar("Exporting messages...");
    let result = Exporter::new(client, export_config)
        .with_progress(pb.clone())
        .with_shutdown(shutdown)
        .export(filter)
        .await;
    pb.finish_and_clear();
    result
}

pub async fn run_import(
    client: Arc<dyn GmailClient>,
    import_config: ImportConfig,
    reporter: &ProgressReporter,
    shutdown: ShutdownSignal,
) -> Result<BatchResult<u64>> {
    info!(
        "Importing from {:?} with {} workers",
        import_config.input_dir, import_config.parallel_workers
    );

    let pb = reporter.add_progress_bar("Importing files...");
    let result = Importer::new(client, import_config)
        .with_progress(pb.clone())
        .with_shutdown(shutdown)
        .import()
        .await;
    pb.finish_and_clear();
    result
}

pub async fn run_cleanup(
    client: Arc<dyn GmailClient>,
    cleanup_config: CleanupConfig,
    reporter: &ProgressReporter,
    shutdown: ShutdownSignal,
) -> Result<BatchResult<u64>> {
    info!(
        "Cleanup of {:?}: action={} dry_run={}",
        cleanup_config.manifest_path, cleanup_config.action, cleanup_config.dry_run
    );

    let pb = reporter.add_progress_bar("Cleaning up messages...");
    let result = Cleaner::new(client, cleanup_config)
        .with_progress(pb.clone())
        .with_shutdown(shutdown)
        .cleanup()
        .await;
    pb.finish_and_clear();
    result
}

/// Scan `dir` and write its manifest; returns the manifest path and entry count
pub async fn run_generate_manifest(dir: &Path, force: bool) -> Result<(PathBuf, usize)> {
    let path = manifest::manifest_path(dir);
    if path.exists() && !force {
        return Err(GmailError::Setup(format!(
            "Manifest already exists at {:?}. Use --force to overwrite.",
            path
        )));
    }

    let records = manifest::generate_from_directory(dir)?;
    manifest::save(&path, &records).await?;
    Ok((path, records.len()))
}
