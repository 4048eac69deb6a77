//! Gmail Exporter
//!
//! Export, import and clean up Gmail messages through the Gmail API.
//!
//! # Overview
//!
//! - **Query building**: filter criteria become Gmail search queries
//! - **Worker pool**: one bounded-concurrency engine shared by every operation
//! - **Export**: matching messages written as `.eml`, `.json` or `.mbox` files
//! - **Import**: exported files re-inserted with `users.messages.import`
//! - **Cleanup**: exported messages archived or permanently deleted
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gmail_exporter::{auth, client::ProductionGmailClient, config::Config};
//! use gmail_exporter::export::{ExportConfig, Exporter};
//! use gmail_exporter::query::FilterSpec;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("gmail-exporter.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         &config.auth.credentials_file,
//!         &config.auth.token_file,
//!     ).await?;
//!     let client = Arc::new(ProductionGmailClient::new(hub, config.api.max_concurrent_requests));
//!
//!     let filter = FilterSpec {
//!         subject: Some("Invoice".to_string()),
//!         ..FilterSpec::default()
//!     };
//!     let result = Exporter::new(client, ExportConfig::default()).export(&filter).await?;
//!     println!("exported {} of {}", result.total_succeeded, result.total_matched);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Rate-limited Gmail API client with retry logic
//! - [`cli`] - Command-line interface and command runners
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`query`] - Filter criteria and search query building
//! - [`pool`] - Concurrent batch engine
//! - [`shutdown`] - Cooperative cancellation
//! - [`export`], [`import`], [`cleanup`] - The three batch operations
//! - [`formats`] - On-disk message formats
//! - [`manifest`] - Record of exported messages
//! - [`metrics`] - Per-run metrics files
//! - [`models`] - Core data structures

pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod formats;
pub mod import;
pub mod manifest;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod query;
pub mod shutdown;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

pub use models::{ExportedMessage, MessageFormat, MessagePage, RemoteMessage};

pub use query::FilterSpec;

pub use pool::{BatchResult, Failure, WorkerPool};

pub use shutdown::ShutdownSignal;

pub use config::Config;

pub use client::{GmailClient, ProductionGmailClient, RetryPolicy};

pub use export::{ExportConfig, Exporter};
pub use import::{ImportConfig, Importer};
pub use cleanup::{Cleaner, CleanupAction, CleanupConfig};

pub use formats::ExportFormat;
pub use manifest::ProcessedItemRecord;
pub use metrics::RunMetrics;

pub use cli::{Cli, Commands, ProgressReporter};
