//! Record of exported messages, consumed later by cleanup

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{GmailError, Result};
use crate::formats::ExportFormat;
use crate::pool::{Processed, WorkItem};

/// File name of the manifest inside an export directory
pub const MANIFEST_FILE_NAME: &str = "processed_emails.json";

static MESSAGE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{10,20}$").expect("static regex is valid"));

/// One successfully exported message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItemRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Bytes written to disk
    pub size: u64,
    pub processed: DateTime<Utc>,
}

impl ProcessedItemRecord {
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            subject: None,
            from: None,
            date: None,
            size,
            processed: Utc::now(),
        }
    }
}

impl Processed for ProcessedItemRecord {
    fn bytes(&self) -> u64 {
        self.size
    }
}

impl WorkItem for ProcessedItemRecord {
    fn describe(&self) -> String {
        self.id.clone()
    }
}

/// Path of the manifest for an export directory
pub fn manifest_path(output_dir: &Path) -> PathBuf {
    output_dir.join(MANIFEST_FILE_NAME)
}

/// Write `contents` to `path`, readable by the owner only
pub async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}

/// Save records as a pretty JSON array
pub async fn save(path: &Path, records: &[ProcessedItemRecord]) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)?;
    write_private(path, &json).await?;
    info!("Saved manifest with {} records to {:?}", records.len(), path);
    Ok(())
}

/// Load a manifest written by [`save`]
pub async fn load(path: &Path) -> Result<Vec<ProcessedItemRecord>> {
    let json = tokio::fs::read(path)
        .await
        .map_err(|e| GmailError::Setup(format!("Failed to read manifest {:?}: {}", path, e)))?;

    let records: Vec<ProcessedItemRecord> = serde_json::from_slice(&json)
        .map_err(|e| GmailError::Setup(format!("Failed to parse manifest {:?}: {}", path, e)))?;

    debug!("Loaded {} records from {:?}", records.len(), path);
    Ok(records)
}

/// Whether a file stem looks like a Gmail message ID
pub fn is_message_id(candidate: &str) -> bool {
    MESSAGE_ID.is_match(candidate)
}

/// Rebuild manifest records from an existing export directory.
///
/// Picks up every exported file whose stem is a message ID, in path order.
/// Header fields are left empty; size is the file size on disk.
pub fn generate_from_directory(dir: &Path) -> Result<Vec<ProcessedItemRecord>> {
    if !dir.is_dir() {
        return Err(GmailError::Setup(format!(
            "Export directory does not exist: {:?}",
            dir
        )));
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry =
            entry.map_err(|e| GmailError::Setup(format!("Failed to scan {:?}: {}", dir, e)))?;
        if !entry.file_type().is_file() || ExportFormat::from_path(entry.path()).is_none() {
            continue;
        }

        let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_message_id(stem) {
            continue;
        }

        let size = entry
            .metadata()
            .map_err(|e| GmailError::Setup(format!("Failed to stat {:?}: {}", entry.path(), e)))?
            .len();
        records.push(ProcessedItemRecord::new(stem, size));
    }

    info!("Found {} exported messages in {:?}", records.len(), dir);
    Ok(records)
}
