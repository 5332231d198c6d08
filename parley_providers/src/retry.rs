use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry an async operation, sleeping `delays[i]` before attempt `i + 2`.
///
/// # Arguments
/// * `operation` - The async operation to retry
/// * `delays` - Waits between attempts; `delays.len() + 1` attempts in total
/// * `should_retry` - Whether an error is worth another attempt
///
/// # Returns
/// The first success, or the error that ended the attempts
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    mut operation: F,
    delays: &[Duration],
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let attempts = delays.len() + 1;
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let Some(delay) = delays.get(attempt - 1) else {
            return Err(err);
        };
        if !should_retry(&err) {
            return Err(err);
        }

        warn!(
            "Request failed (attempt {attempt}/{attempts}): {err}. Retrying after {}s...",
            delay.as_secs_f32()
        );
        sleep(*delay).await;
        attempt += 1;
    }
}
