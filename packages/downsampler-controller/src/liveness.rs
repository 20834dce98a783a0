use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;

/// Retry `probe` every `interval` until it succeeds. Never gives up.
///
/// Returns the number of attempts it took.
pub async fn wait_until_reachable<F, Fut>(name: &str, interval: Duration, mut probe: F) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match probe().await {
            Ok(()) => {
                info!(dependency = name, attempts, "Dependency reachable");
                return attempts;
            }
            Err(e) => {
                warn!(
                    dependency = name,
                    attempts,
                    error = %e,
                    retry_in_ms = interval.as_millis() as u64,
                    "Dependency not reachable yet"
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}
