//! End-to-end tests for the cleanup operation against a mocked Gmail client

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{write_manifest, MockGmailClient};
use gmail_exporter::cleanup::{
    Cleaner, CleanupAction, CleanupConfig, CLEANUP_METRICS_FILE_NAME, INBOX_LABEL,
};
use gmail_exporter::error::GmailError;
use tempfile::TempDir;

const IDS: [&str; 2] = ["18c2f0a1b2c3d401", "18c2f0a1b2c3d402"];

fn config_for(manifest_path: PathBuf, action: CleanupAction) -> CleanupConfig {
    CleanupConfig {
        manifest_path,
        action,
        ..CleanupConfig::default()
    }
}

#[tokio::test]
async fn test_dry_run_delete_never_calls_api() {
    let dir = TempDir::new().unwrap();
    let manifest_path = write_manifest(dir.path(), &IDS).await;

    let mut mock = MockGmailClient::new();
    mock.expect_delete_message().times(0);
    mock.expect_modify_labels().times(0);

    let config = CleanupConfig {
        dry_run: true,
        ..config_for(manifest_path, CleanupAction::Delete)
    };
    let result = Cleaner::new(Arc::new(mock), config).cleanup().await.unwrap();

    assert_eq!(result.total_matched, 2);
    assert_eq!(result.processed(), 2);
    assert_eq!(result.total_succeeded, 2);
    assert!(!dir.path().join(CLEANUP_METRICS_FILE_NAME).exists());
}

#[tokio::test]
async fn test_archive_removes_inbox_label() {
    let dir = TempDir::new().unwrap();
    let manifest_path = write_manifest(dir.path(), &IDS).await;

    let mut mock = MockGmailClient::new();
    mock.expect_modify_labels()
        .withf(|id, add, remove| {
            IDS.iter().any(|known| *known == id)
                && add.is_empty()
                && remove.len() == 1
                && remove[0] == INBOX_LABEL
        })
        .times(2)
        .returning(|_, _, _| Ok(()));
    mock.expect_delete_message().times(0);

    let result = Cleaner::new(Arc::new(mock), config_for(manifest_path, CleanupAction::Archive))
        .cleanup()
        .await
        .unwrap();

    assert_eq!(result.total_succeeded, 2);
    assert_eq!(result.total_bytes, 200);
    assert!(dir.path().join(CLEANUP_METRICS_FILE_NAME).exists());
}

#[tokio::test]
async fn test_delete_with_limit() {
    let dir = TempDir::new().unwrap();
    let manifest_path = write_manifest(dir.path(), &IDS).await;

    let mut mock = MockGmailClient::new();
    mock.expect_delete_message()
        .withf(|id| id == IDS[0])
        .times(1)
        .returning(|_| Ok(()));

    let config = CleanupConfig {
        limit: Some(1),
        ..config_for(manifest_path, CleanupAction::Delete)
    };
    let result = Cleaner::new(Arc::new(mock), config).cleanup().await.unwrap();

    assert_eq!(result.total_matched, 2);
    assert_eq!(result.processed(), 1);
    assert_eq!(result.total_succeeded, 1);
}

#[tokio::test]
async fn test_cleanup_failures_are_recorded() {
    let dir = TempDir::new().unwrap();
    let manifest_path = write_manifest(dir.path(), &IDS).await;

    let mut mock = MockGmailClient::new();
    mock.expect_delete_message().times(2).returning(|id| {
        if id == IDS[1] {
            Err(GmailError::Forbidden("insufficient scope".to_string()))
        } else {
            Ok(())
        }
    });

    let result = Cleaner::new(Arc::new(mock), config_for(manifest_path, CleanupAction::Delete))
        .cleanup()
        .await
        .unwrap();

    assert_eq!(result.total_succeeded, 1);
    assert_eq!(result.total_failed, 1);
    assert_eq!(result.failures[0].item, IDS[1]);
}

#[tokio::test]
async fn test_missing_manifest_is_setup_error() {
    let dir = TempDir::new().unwrap();
    let mut mock = MockGmailClient::new();
    mock.expect_modify_labels().times(0);

    let config = config_for(dir.path().join("missing.json"), CleanupAction::Archive);
    let err = Cleaner::new(Arc::new(mock), config)
        .cleanup()
        .await
        .unwrap_err();

    assert!(matches!(err, GmailError::Setup(_)));
}

#[test]
fn test_unknown_action_is_rejected() {
    let err = "archivex".parse::<CleanupAction>().unwrap_err();
    assert!(matches!(err, GmailError::Validation(_)));
}

#[tokio::test]
async fn test_zero_limit_cleans_every_entry() {
    let dir = TempDir::new().unwrap();
    let manifest_path = write_manifest(dir.path(), &IDS).await;

    let mut mock = MockGmailClient::new();
    mock.expect_delete_message().times(2).returning(|_| Ok(()));

    let config = CleanupConfig {
        limit: Some(0),
        ..config_for(manifest_path, CleanupAction::Delete)
    };
    let result = Cleaner::new(Arc::new(mock), config).cleanup().await.unwrap();

    assert_eq!(result.processed(), 2);
    assert_eq!(result.total_succeeded, 2);
}
