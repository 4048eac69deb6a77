//! Common test utilities and fixtures

#![allow(dead_code)]

use gmail_exporter::client::GmailClient;
use gmail_exporter::error::Result;
use gmail_exporter::manifest::{self, ProcessedItemRecord};
use gmail_exporter::models::{MessageFormat, MessagePage, RemoteMessage};
use mockall::mock;
use std::path::{Path, PathBuf};

/// RFC 822 message padded to exactly `size` bytes
pub fn raw_message_of_size(subject: &str, size: usize) -> Vec<u8> {
    let mut raw = format!(
        "From: bill@ex.com\r\nSubject: {}\r\n\r\n",
        subject
    )
    .into_bytes();
    assert!(raw.len() <= size, "header block larger than {} bytes", size);
    raw.resize(size, b'x');
    raw
}

/// Remote message as returned by a raw-format fetch
pub fn create_test_message(id: &str, labels: &[&str], raw: Vec<u8>) -> RemoteMessage {
    RemoteMessage {
        id: id.to_string(),
        thread_id: Some(format!("thread_{}", id)),
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        snippet: None,
        size_estimate: Some(raw.len() as i32),
        internal_date: Some(1_704_132_000_000),
        raw,
    }
}

/// Single search page with no continuation
pub fn single_page(ids: &[&str]) -> MessagePage {
    MessagePage {
        ids: ids.iter().map(|id| id.to_string()).collect(),
        next_page_token: None,
    }
}

/// Write a manifest listing `ids` into `dir`, returning its path
pub async fn write_manifest(dir: &Path, ids: &[&str]) -> PathBuf {
    let records: Vec<_> = ids
        .iter()
        .map(|id| ProcessedItemRecord::new(*id, 100))
        .collect();
    let path = manifest::manifest_path(dir);
    manifest::save(&path, &records).await.unwrap();
    path
}

// Mock implementation of GmailClient for testing
mock! {
    pub GmailClient {}

    #[async_trait::async_trait]
    impl GmailClient for GmailClient {
        async fn list_message_page(
            &self,
            query: &str,
            page_token: Option<String>,
        ) -> Result<MessagePage>;
        async fn fetch_message(&self, id: &str, format: MessageFormat) -> Result<RemoteMessage>;
        async fn import_message(&self, raw: &[u8]) -> Result<String>;
        async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;
        async fn delete_message(&self, id: &str) -> Result<()>;
    }
}
