//! On-disk message formats for export and import

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{GmailError, Result};
use crate::models::{ExportedMessage, RemoteMessage};

/// Lines that would be mistaken for an mbox separator, with any quoting
static MBOX_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(>*From )").expect("static regex is valid")
});

static MBOX_UNESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^>(>*From )").expect("static regex is valid")
});

/// File format selected for an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// RFC 822 source, one file per message
    #[default]
    Eml,
    /// [`ExportedMessage`] as pretty JSON
    Json,
    /// Single-message mbox file
    Mbox,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Eml => "eml",
            ExportFormat::Json => "json",
            ExportFormat::Mbox => "mbox",
        }
    }

    /// Format implied by a file extension, case-insensitive
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        ext.parse().ok()
    }

    /// Serialize a fetched message into file contents
    pub fn encode(&self, message: &RemoteMessage) -> Result<Vec<u8>> {
        match self {
            ExportFormat::Eml => Ok(message.raw.clone()),
            ExportFormat::Json => {
                let record = exported_message(message);
                Ok(serde_json::to_vec_pretty(&record)?)
            }
            ExportFormat::Mbox => Ok(encode_mbox(message)),
        }
    }

    /// Split file contents back into raw RFC 822 payloads
    pub fn decode(&self, contents: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self {
            ExportFormat::Eml => {
                if contents.iter().all(u8::is_ascii_whitespace) {
                    return Err(GmailError::InvalidMessageFormat(
                        "empty message file".to_string(),
                    ));
                }
                Ok(vec![contents.to_vec()])
            }
            ExportFormat::Json => {
                let record: ExportedMessage = serde_json::from_slice(contents)?;
                if record.raw.is_empty() {
                    return Err(GmailError::InvalidMessageFormat(format!(
                        "message {} has no raw content",
                        record.id
                    )));
                }
                Ok(vec![record.raw])
            }
            ExportFormat::Mbox => {
                let messages = split_mbox(contents);
                if messages.is_empty() {
                    return Err(GmailError::InvalidMessageFormat(
                        "mbox file contains no messages".to_string(),
                    ));
                }
                Ok(messages)
            }
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = GmailError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eml" => Ok(ExportFormat::Eml),
            "json" => Ok(ExportFormat::Json),
            "mbox" => Ok(ExportFormat::Mbox),
            other => Err(GmailError::Validation(format!(
                "invalid export format: {} (valid: eml, json, mbox)",
                other
            ))),
        }
    }
}

/// Headers relevant to manifests and JSON exports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub date: Option<String>,
}

/// Read the header block of an RFC 822 message.
///
/// Folded lines are unfolded; the first occurrence of each header wins.
pub fn parse_headers(raw: &[u8]) -> MessageHeaders {
    let text = String::from_utf8_lossy(raw);
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with(|c: char| c == ' ' || c == '\t') {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = current.take() {
            fields.entry(name).or_insert(value);
        }
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    if let Some((name, value)) = current {
        fields.entry(name).or_insert(value);
    }

    MessageHeaders {
        subject: fields.remove("subject"),
        from: fields.remove("from"),
        to: fields.remove("to"),
        date: fields.remove("date"),
    }
}

fn exported_message(message: &RemoteMessage) -> ExportedMessage {
    let headers = parse_headers(&message.raw);
    ExportedMessage {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        label_ids: message.label_ids.clone(),
        snippet: message.snippet.clone(),
        size_estimate: message.size_estimate,
        internal_date: message.internal_date,
        subject: headers.subject,
        from: headers.from,
        to: headers.to,
        date: headers.date,
        raw: message.raw.clone(),
    }
}

/// Envelope sender for the `From ` separator line
fn envelope_sender(from: Option<&str>) -> String {
    from.and_then(|f| {
        let address = match (f.find('<'), f.rfind('>')) {
            (Some(start), Some(end)) if start < end => &f[start + 1..end],
            _ => f,
        };
        let address = address.trim();
        (!address.is_empty() && !address.contains(char::is_whitespace))
            .then(|| address.to_string())
    })
    .unwrap_or_else(|| "MAILER-DAEMON".to_string())
}

fn encode_mbox(message: &RemoteMessage) -> Vec<u8> {
    let headers = parse_headers(&message.raw);
    let when = message
        .received_at()
        .unwrap_or_default();

    let mut out = format!(
        "From {} {}\n",
        envelope_sender(headers.from.as_deref()),
        when.format("%a %b %e %H:%M:%S %Y")
    )
    .into_bytes();

    let body = MBOX_ESCAPE.replace_all(&message.raw, &b">$1"[..]);
    out.extend_from_slice(&body);
    if !body.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.push(b'\n');
    out
}

/// Split an mbox file on `From ` separator lines and undo `>From ` quoting.
pub fn split_mbox(contents: &[u8]) -> Vec<Vec<u8>> {
    let mut messages = Vec::new();
    let mut current: Option<Vec<u8>> = None;

    for line in contents.split_inclusive(|b| *b == b'\n') {
        if line.starts_with(b"From ") {
            if let Some(done) = current.take() {
                messages.push(done);
            }
            current = Some(Vec::new());
            continue;
        }
        if let Some(buffer) = current.as_mut() {
            buffer.extend_from_slice(line);
        }
    }
    if let Some(done) = current {
        messages.push(done);
    }

    messages
        .into_iter()
        .map(|mut message| {
            // Drop the blank line that precedes the next separator
            if message.ends_with(b"\n\n") {
                message.pop();
            } else if message.ends_with(b"\r\n\r\n") {
                message.truncate(message.len() - 2);
            }
            MBOX_UNESCAPE.replace_all(&message, &b"$1"[..]).into_owned()
        })
        .filter(|message| !message.iter().all(u8::is_ascii_whitespace))
        .collect()
}
