use anyhow::Result;
use clap::Parser;
use gmail_exporter::cli::{self, Cli, Commands, LogFormat, ProgressReporter};
use gmail_exporter::client::SCOPE_MODIFY;
use gmail_exporter::config::Config;
use gmail_exporter::error::GmailError;
use gmail_exporter::pool::BatchResult;
use gmail_exporter::shutdown::ShutdownSignal;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Exit code when the batch finished but some items failed
const EXIT_PARTIAL_FAILURE: i32 = 2;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Vec<u8>,
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let msg = String::from_utf8_lossy(&self.buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                if self.multi.is_hidden() {
                    eprintln!("{}", msg);
                } else {
                    let _ = self.multi.println(msg);
                }
            }
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter {
            multi: Arc::clone(&self.multi),
            buffer: Vec::new(),
        }
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            display_error(&e);
            process::exit(1);
        }
    }
}

fn init_tracing(cli: &Cli, multi: Arc<MultiProgress>) {
    let default_directive = if cli.verbose {
        "gmail_exporter=debug,info"
    } else {
        "gmail_exporter=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let make_writer = MultiProgressMakeWriter { multi };

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(make_writer)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(make_writer)
            .init(),
    }
}

/// Trigger `shutdown` on the first Ctrl-C
fn install_ctrl_c_handler(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight items...");
            shutdown.trigger();
        }
    });
}

fn exit_code<O>(title: &str, result: &BatchResult<O>) -> i32 {
    println!("\n{}", cli::format_summary(title, result));
    if result.has_failures() {
        EXIT_PARTIAL_FAILURE
    } else {
        0
    }
}

async fn run() -> Result<i32> {
    // Install default crypto provider for rustls
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let multi_progress = Arc::new(MultiProgress::new());
    init_tracing(&cli, Arc::clone(&multi_progress));
    let reporter = ProgressReporter::with_multi_progress((*multi_progress).clone());

    let shutdown = ShutdownSignal::new();
    install_ctrl_c_handler(shutdown.clone());

    if let Commands::InitConfig { output, force } = &cli.command {
        if output.exists() && !force {
            return Err(GmailError::ConfigError(format!(
                "Configuration file already exists at {:?}. Use --force to overwrite.",
                output
            ))
            .into());
        }

        Config::create_example(output).await?;
        println!("Created example configuration file at: {:?}", output);
        println!("\nKey settings to review:");
        println!("  - auth.credentials_file: OAuth2 client secret from Google Cloud Console");
        println!("  - export.output_dir / export.format: where and how messages are written");
        println!("  - export.parallel_workers: concurrent messages per run (1-50)");
        println!("  - cleanup.action: 'archive' or 'delete'");
        return Ok(0);
    }

    let config = Config::load(&cli.config).await?;

    match &cli.command {
        Commands::Auth { force } => {
            let token_cache = cli.token_cache_path(&config);

            if *force && token_cache.exists() {
                tokio::fs::remove_file(&token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub = gmail_exporter::auth::initialize_gmail_hub(
                &cli.credentials_path(&config),
                &token_cache,
            )
            .await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", token_cache);

            // Scope must match the cached token to avoid a second OAuth flow
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(SCOPE_MODIFY)
                .doit()
                .await
                .map_err(GmailError::from)?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(0)
        }

        Commands::Export(args) => {
            // Bad flags and filters fail here, before any OAuth round trip
            let (filter, export_config) = args.prepare(&config)?;

            let client = cli::connect(&cli, &config, &reporter).await?;
            let result =
                cli::run_export(client, &filter, export_config, &reporter, shutdown).await?;
            Ok(exit_code("Export", &result))
        }

        Commands::Import(args) => {
            let import_config = args.import_config(&config)?;

            let client = cli::connect(&cli, &config, &reporter).await?;
            let result = cli::run_import(client, import_config, &reporter, shutdown).await?;
            Ok(exit_code("Import", &result))
        }

        Commands::Cleanup(args) => {
            let cleanup_config = args.cleanup_config(&config)?;
            if cleanup_config.dry_run {
                println!("Running in DRY RUN mode - no changes will be made");
            }

            let client = cli::connect(&cli, &config, &reporter).await?;
            let result = cli::run_cleanup(client, cleanup_config, &reporter, shutdown).await?;
            Ok(exit_code("Cleanup", &result))
        }

        Commands::GenerateManifest { dir, force } => {
            let dir = dir.clone().unwrap_or_else(|| config.export.output_dir.clone());
            let (path, count) = cli::run_generate_manifest(&dir, *force).await?;
            println!("Wrote manifest with {} entries to {:?}", count, path);
            Ok(0)
        }

        Commands::InitConfig { .. } => Ok(0),
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(gmail_err) = error.downcast_ref::<GmailError>() {
        match gmail_err {
            GmailError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      Try running: gmail-exporter auth --force");
            }
            GmailError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: You've hit Gmail API rate limits.");
                eprintln!("      Consider reducing api.max_concurrent_requests or --workers.");
            }
            GmailError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-exporter init-config --force");
            }
            _ => {}
        }
    }
}
