use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message representation requested from `users.messages.get`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// Only message ID and thread ID
    Minimal,
    /// ID, labels, snippet, size estimate and the requested headers
    Metadata,
    /// Entire RFC 822 message as base64url in the `raw` field
    Raw,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Minimal => "minimal",
            MessageFormat::Metadata => "metadata",
            MessageFormat::Raw => "raw",
        }
    }
}

/// One page of a `users.messages.list` search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// A message as returned by the remote API
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    pub size_estimate: Option<i32>,
    /// Milliseconds since the epoch
    pub internal_date: Option<i64>,
    /// RFC 822 bytes; empty unless fetched with [`MessageFormat::Raw`]
    pub raw: Vec<u8>,
}

impl RemoteMessage {
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.internal_date.and_then(DateTime::from_timestamp_millis)
    }
}

/// Structured JSON export record
///
/// `raw` keeps the full RFC 822 source so a JSON export can be imported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub size_estimate: Option<i32>,
    #[serde(default)]
    pub internal_date: Option<i64>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(with = "base64url")]
    pub raw: Vec<u8>,
}

/// Serde adapter for Gmail's base64url payloads
///
/// Encodes without padding; decoding accepts padded input too.
pub mod base64url {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde::{
        de::{self, Deserializer},
        Deserialize, Serializer,
    };

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        decode(&s).map_err(de::Error::custom)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
        URL_SAFE_NO_PAD.decode(s.trim().trim_end_matches('='))
    }
}
