//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineResult, SyncError};

/// Default number of operations written per batch.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 10;

/// Default number of identities read per snapshot batch.
pub const DEFAULT_SNAPSHOT_BATCH_SIZE: usize = 50;

/// Which candidate wins when terminals hold different artifacts (or
/// profiles) for the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The elected primary wins; otherwise the most recent observation.
    #[default]
    PrimaryFirst,
    /// The most recent observation wins; primary breaks ties.
    RecencyFirst,
}

/// Configuration for a sync round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Deadline for opening one channel (ms).
    pub connect_timeout_ms: u64,
    /// Deadline for a single device command (ms).
    pub command_timeout_ms: u64,
    /// Deadline for all work against one device in one phase (ms).
    pub device_timeout_ms: u64,
    /// Connection attempts before a device is unreachable for the round.
    pub connect_retries: u32,
    /// Base backoff between attempts (ms); doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Identities per snapshot read batch.
    pub snapshot_batch_size: usize,
    /// Identities read by the functional face/photo probe.
    pub probe_batch_size: usize,
    /// Operations written per execution batch.
    pub write_batch_size: usize,
    /// Pause between execution batches (ms).
    pub batch_pause_ms: u64,
    /// Extra attempts per failed operation or failed single-identity read.
    pub operation_retries: u32,
    /// Devices processed concurrently.
    pub max_concurrency: usize,
    /// Largest group a round accepts.
    pub max_group_size: usize,
    /// Artifact and profile conflict resolution.
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            command_timeout_ms: 15_000,
            device_timeout_ms: 300_000,
            connect_retries: 3,
            retry_backoff_ms: 2_000,
            snapshot_batch_size: DEFAULT_SNAPSHOT_BATCH_SIZE,
            probe_batch_size: 1,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            batch_pause_ms: 100,
            operation_retries: 2,
            max_concurrency: 3,
            max_group_size: 32,
            conflict_policy: ConflictPolicy::PrimaryFirst,
        }
    }
}

impl SyncConfig {
    /// Checks values that would make a round hang or do nothing.
    pub fn validate(&self) -> EngineResult<()> {
        let checks = [
            (self.connect_timeout_ms == 0, "connect_timeout_ms must be > 0"),
            (self.command_timeout_ms == 0, "command_timeout_ms must be > 0"),
            (self.device_timeout_ms == 0, "device_timeout_ms must be > 0"),
            (self.connect_retries == 0, "connect_retries must be > 0"),
            (self.snapshot_batch_size == 0, "snapshot_batch_size must be > 0"),
            (self.probe_batch_size == 0, "probe_batch_size must be > 0"),
            (self.write_batch_size == 0, "write_batch_size must be > 0"),
            (self.max_concurrency == 0, "max_concurrency must be > 0"),
            (self.max_group_size == 0, "max_group_size must be > 0"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(SyncError::Config((*msg).to_string())),
            None => Ok(()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(6);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}
