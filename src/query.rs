//! Filter criteria and their translation into Gmail search queries
//!
//! Gmail treats a query as an unordered conjunction of space-separated terms
//! where a leading `-` negates a term. [`build_query`] emits clauses in a
//! fixed order so that the same [`FilterSpec`] always yields a byte-identical
//! query string.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{GmailError, Result};

/// Search scopes accepted by [`validate`]; `all_mail` adds no clause
pub const SEARCH_SCOPES: &[&str] = &["all_mail", "inbox", "sent", "drafts", "spam", "trash"];

/// Default search scope (search every mailbox partition)
pub const DEFAULT_SCOPE: &str = "all_mail";

/// Optional predicates that narrow which messages an export touches
///
/// Every field is independent; an empty spec matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub to: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
    /// Space-separated words that must appear
    pub includes_words: Option<String>,
    /// Space-separated words that must not appear
    pub excludes_words: Option<String>,
    /// Minimum size in bytes (`size:`)
    pub size_greater_than: Option<u64>,
    /// Maximum size in bytes (`-size:`)
    pub size_less_than: Option<u64>,
    /// Relative window, rendered as whole days
    #[serde(skip)]
    pub date_within: Option<Duration>,
    pub date_after: Option<NaiveDate>,
    pub date_before: Option<NaiveDate>,
    pub has_attachment: Option<bool>,
    pub exclude_chats: bool,
    /// Comma-separated label names
    pub labels: Option<String>,
    pub search_scope: Option<String>,
}

impl FilterSpec {
    /// Render this spec as a Gmail search query
    pub fn build_query(&self) -> String {
        build_query(self)
    }

    /// Check for contradictory or unsupported criteria
    pub fn validate(&self) -> Result<()> {
        validate(self)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Translate a filter spec into a Gmail search query.
///
/// Clause order: `to`, `from`, `subject`, included words, excluded words,
/// minimum size, maximum size, relative window, after, before, attachment,
/// chats, labels, scope.
///
/// The maximum size is emitted as `-size:<max>`, i.e. "not at least max".
/// Gmail's grammar has no strict less-than operator for sizes, so this is an
/// approximation and is kept as such.
pub fn build_query(spec: &FilterSpec) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(to) = non_empty(&spec.to) {
        parts.push(format!("to:{}", to));
    }
    if let Some(from) = non_empty(&spec.from) {
        parts.push(format!("from:{}", from));
    }
    if let Some(subject) = non_empty(&spec.subject) {
        if subject.contains(char::is_whitespace) {
            parts.push(format!("subject:({})", subject));
        } else {
            parts.push(format!("subject:{}", subject));
        }
    }
    if let Some(words) = non_empty(&spec.includes_words) {
        parts.extend(words.split_whitespace().map(str::to_string));
    }
    if let Some(words) = non_empty(&spec.excludes_words) {
        parts.extend(words.split_whitespace().map(|w| format!("-{}", w)));
    }

    if let Some(min) = spec.size_greater_than.filter(|&s| s > 0) {
        parts.push(format!("size:{}", min));
    }
    if let Some(max) = spec.size_less_than.filter(|&s| s > 0) {
        parts.push(format!("-size:{}", max));
    }

    if let Some(window) = spec.date_within.filter(|d| *d > Duration::zero()) {
        parts.push(format!("newer_than:{}d", window.num_days()));
    }
    if let Some(after) = spec.date_after {
        parts.push(format!("after:{}", after.format("%Y/%m/%d")));
    }
    if let Some(before) = spec.date_before {
        parts.push(format!("before:{}", before.format("%Y/%m/%d")));
    }

    match spec.has_attachment {
        Some(true) => parts.push("has:attachment".to_string()),
        Some(false) => parts.push("-has:attachment".to_string()),
        None => {}
    }
    if spec.exclude_chats {
        parts.push("-in:chats".to_string());
    }

    if let Some(labels) = non_empty(&spec.labels) {
        parts.extend(
            labels
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| format!("label:{}", l)),
        );
    }

    if let Some(scope) = non_empty(&spec.search_scope) {
        if !is_default_scope(scope) {
            parts.push(format!("in:{}", scope));
        }
    }

    parts.join(" ")
}

fn is_default_scope(scope: &str) -> bool {
    scope == DEFAULT_SCOPE || scope == "all"
}

/// Reject filter specs that cannot match anything or that Gmail would not
/// understand.
pub fn validate(spec: &FilterSpec) -> Result<()> {
    if let (Some(min), Some(max)) = (spec.size_greater_than, spec.size_less_than) {
        if min > 0 && max > 0 && min >= max {
            return Err(GmailError::Validation(format!(
                "size-greater-than ({}) must be less than size-less-than ({})",
                min, max
            )));
        }
    }

    if let (Some(after), Some(before)) = (spec.date_after, spec.date_before) {
        if after > before {
            return Err(GmailError::Validation(format!(
                "date-after ({}) must not be later than date-before ({})",
                after, before
            )));
        }
    }

    if let Some(scope) = non_empty(&spec.search_scope) {
        if !is_default_scope(scope) && !SEARCH_SCOPES.contains(&scope) {
            return Err(GmailError::Validation(format!(
                "invalid search scope: {} (valid: {})",
                scope,
                SEARCH_SCOPES.join(", ")
            )));
        }
    }

    Ok(())
}

/// Parse a human size such as `5MB` or `1.5GB` into bytes (1024-based).
pub fn parse_size(input: &str) -> Result<u64> {
    let normalized = input.trim().to_ascii_uppercase();
    let split = normalized
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(normalized.len());
    let (number, unit) = normalized.split_at(split);

    if number.is_empty() {
        return Err(GmailError::Validation(format!(
            "invalid size format: {}",
            input
        )));
    }

    let value: f64 = number
        .parse()
        .map_err(|_| GmailError::Validation(format!("invalid number in size: {}", number)))?;

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        "TB" => 1 << 40,
        other => {
            return Err(GmailError::Validation(format!(
                "invalid size unit: {} (valid: B, KB, MB, GB, TB)",
                other
            )))
        }
    };

    let bytes = value * multiplier as f64;
    // u64::MAX rounds up to 2^64 as f64, so equality is already out of range
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(GmailError::Validation(format!("size out of range: {}", input)));
    }

    Ok(bytes as u64)
}

/// Parse a relative window such as `30d`, `2w` or `6m`.
///
/// Months count as 30 days and years as 365 days.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let normalized = input.trim().to_ascii_lowercase();

    if normalized.len() < 2 || !normalized.is_char_boundary(normalized.len() - 1) {
        return Err(GmailError::Validation(format!(
            "invalid duration format: {}",
            input
        )));
    }

    let (number, unit) = normalized.split_at(normalized.len() - 1);
    let amount: i64 = number
        .parse()
        .map_err(|_| GmailError::Validation(format!("invalid number in duration: {}", number)))?;

    let window = match unit {
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        "m" => amount.checked_mul(30).and_then(Duration::try_days),
        "y" => amount.checked_mul(365).and_then(Duration::try_days),
        other => {
            return Err(GmailError::Validation(format!(
                "invalid duration unit: {} (valid: h, d, w, m, y)",
                other
            )))
        }
    };

    window.ok_or_else(|| GmailError::Validation(format!("duration out of range: {}", input)))
}

/// Parse a `YYYY-MM-DD` date flag.
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|e| {
        GmailError::Validation(format!("invalid date {} (use YYYY-MM-DD): {}", input, e))
    })
}
