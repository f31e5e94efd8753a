use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Waits between the first retries, in seconds. Once the schedule runs out
/// the executor keeps retrying at [`STEADY_RETRY`] forever.
const BACKOFF_DELAYS: [u64; 8] = [1, 3, 5, 10, 15, 30, 45, 60];
const STEADY_RETRY: Duration = Duration::from_secs(60);

/// Outcome of a delivery loop. There is no failure variant: delivery is
/// retried until it succeeds, and only shutdown can end the loop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery<T> {
    Completed(T),
    Cancelled,
}

/// Runs `op` until it succeeds, waiting per the backoff schedule and then at
/// the steady interval. Every wait races the cancellation token; a token
/// fired mid-wait returns [`Delivery::Cancelled`] without invoking `op`
/// again. Intended solely for actions that must eventually succeed
/// (notification delivery), never for status polling.
pub async fn deliver<T, E, F, Fut>(token: &CancellationToken, label: &str, mut op: F) -> Delivery<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    for delay in BACKOFF_DELAYS {
        match op().await {
            Ok(value) => return Delivery::Completed(value),
            Err(err) => log::warn!("{} failed: {}, retrying in {}s", label, err, delay),
        }
        if wait(token, Duration::from_secs(delay)).await {
            return Delivery::Cancelled;
        }
    }

    loop {
        match op().await {
            Ok(value) => {
                log::info!("{} recovered", label);
                return Delivery::Completed(value);
            }
            Err(err) => log::warn!("{} still failing: {}", label, err),
        }
        if wait(token, STEADY_RETRY).await {
            return Delivery::Cancelled;
        }
    }
}

/// Sleeps for `d`, returning true if the token fired first.
async fn wait(token: &CancellationToken, d: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(d) => false,
    }
}
