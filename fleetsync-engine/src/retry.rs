//! Bounded retry with exponential backoff.

use fleetsync_types::DeviceAddr;
use std::future::Future;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::EngineResult;

/// Runs `op` up to `attempts` times, sleeping `config.backoff(n)` between
/// attempts. Errors that are not retryable end the loop immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    config: &SyncConfig,
    attempts: u32,
    device: DeviceAddr,
    what: &str,
    mut op: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = config.backoff(attempt);
                debug!(
                    "{} on {} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, device, attempt, attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
