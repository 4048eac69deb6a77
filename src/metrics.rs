//! Per-run metrics written next to an operation's output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::manifest::write_private;
use crate::pool::{BatchResult, Failure};

/// File name used for the metrics of a run
pub const METRICS_FILE_NAME: &str = "metrics.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailMetrics {
    pub total_matched: usize,
    pub total_succeeded: usize,
    pub total_failed: usize,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub emails_per_second: f64,
    pub bytes_per_second: f64,
}

/// Summary of one export, import or cleanup run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub operation: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub emails: EmailMetrics,
    pub performance: Performance,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<Failure>,
}

impl RunMetrics {
    pub fn from_batch<O>(operation: &str, result: &BatchResult<O>) -> Self {
        let end_time = Utc::now();
        let duration = chrono::Duration::from_std(result.duration)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let seconds = result.duration.as_secs_f64();

        let performance = if seconds > 0.0 {
            Performance {
                emails_per_second: result.processed() as f64 / seconds,
                bytes_per_second: result.total_bytes as f64 / seconds,
            }
        } else {
            Performance::default()
        };

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            start_time: end_time - duration,
            end_time,
            duration_seconds: seconds,
            emails: EmailMetrics {
                total_matched: result.total_matched,
                total_succeeded: result.total_succeeded,
                total_failed: result.total_failed,
                total_size_bytes: result.total_bytes,
            },
            performance,
            cancelled: result.cancelled,
            failures: result.failures.clone(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_private(path, &json).await?;
        info!("Saved {} metrics to {:?}", self.operation, path);
        Ok(())
    }
}

/// Render a byte count with a binary unit, e.g. `1.5 KB`
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: &[u8] = b"KMGTPE";

    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!(
        "{:.1} {}B",
        bytes as f64 / div as f64,
        PREFIXES[exp] as char
    )
}
