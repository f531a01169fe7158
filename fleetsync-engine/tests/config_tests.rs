use fleetsync_engine::{ConflictPolicy, SyncConfig, SyncError};
use std::time::Duration;

#[test]
fn defaults_match_terminal_limits() {
    let config = SyncConfig::default();
    assert_eq!(config.command_timeout_ms, 15_000);
    assert_eq!(config.connect_retries, 3);
    assert_eq!(config.write_batch_size, 10);
    assert_eq!(config.batch_pause_ms, 100);
    assert_eq!(config.max_concurrency, 3);
    assert_eq!(config.conflict_policy, ConflictPolicy::PrimaryFirst);
    assert!(config.validate().is_ok());
}

#[test]
fn partial_config_fills_defaults() {
    let config: SyncConfig =
        serde_json::from_str(r#"{"write_batch_size": 4, "conflict_policy": "recency_first"}"#).unwrap();
    assert_eq!(config.write_batch_size, 4);
    assert_eq!(config.conflict_policy, ConflictPolicy::RecencyFirst);
    assert_eq!(config.snapshot_batch_size, 50);
}

#[test]
fn zero_values_are_rejected() {
    for config in [
        SyncConfig { command_timeout_ms: 0, ..SyncConfig::default() },
        SyncConfig { snapshot_batch_size: 0, ..SyncConfig::default() },
        SyncConfig { max_concurrency: 0, ..SyncConfig::default() },
        SyncConfig { max_group_size: 0, ..SyncConfig::default() },
    ] {
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }
}

#[test]
fn backoff_doubles_and_caps() {
    let config = SyncConfig {
        retry_backoff_ms: 100,
        ..SyncConfig::default()
    };
    assert_eq!(config.backoff(1), Duration::from_millis(100));
    assert_eq!(config.backoff(2), Duration::from_millis(200));
    assert_eq!(config.backoff(3), Duration::from_millis(400));
    assert_eq!(config.backoff(40), Duration::from_millis(6_400));
}

#[test]
fn retryable_errors() {
    assert!(SyncError::Timeout.is_retryable());
    assert!(SyncError::Protocol("garbled".into()).is_retryable());
    assert!(!SyncError::Rejected("full".into()).is_retryable());
    assert!(!SyncError::Cancelled.is_retryable());
    assert!(!SyncError::Unsupported(fleetsync_types::Modality::Face).is_retryable());
}
