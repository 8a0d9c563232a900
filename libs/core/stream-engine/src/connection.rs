//! Redis connection setup with retry
//!
//! Two kinds of connection:
//!
//! - the command connection ([`connect`]): group management, claims,
//!   acknowledgements and health checks, with the client's default reply
//!   timeout
//! - a blocking read connection per subscription ([`connect_blocking`]):
//!   carries nothing but `XREADGROUP ... BLOCK`, so a parked read never
//!   delays another command, and its reply timeout outlasts the block
//!
//! Both are `ConnectionManager`s and reconnect on their own after the first
//! successful connect; retries here only cover startup.

use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff settings for startup connection attempts
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }
}

/// Extra time a blocking read gets on top of its `BLOCK` before the client
/// gives up on the reply
const BLOCKING_REPLY_MARGIN: Duration = Duration::from_secs(2);

/// Open the command connection and verify it with `PING`.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    let manager = open(url, ConnectionManagerConfig::new()).await?;
    info!("Connected to Redis");
    Ok(manager)
}

/// Open a connection reserved for reads blocking up to `read_block`.
pub async fn connect_blocking(
    url: &str,
    read_block: Duration,
) -> redis::RedisResult<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_response_timeout(blocking_reply_timeout(read_block));
    let manager = open(url, config).await?;
    debug!(
        read_block_ms = read_block.as_millis() as u64,
        "Opened blocking read connection"
    );
    Ok(manager)
}

/// Reply timeout for a read that blocks up to `read_block`.
///
/// `BLOCK 0` waits forever, so it gets no timeout at all.
pub fn blocking_reply_timeout(read_block: Duration) -> Option<Duration> {
    if read_block.is_zero() {
        None
    } else {
        Some(read_block + BLOCKING_REPLY_MARGIN)
    }
}

async fn open(url: &str, config: ConnectionManagerConfig) -> redis::RedisResult<ConnectionManager> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new_with_config(client, config).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    Ok(manager)
}

/// [`connect`] with exponential backoff between attempts
pub async fn connect_with_retry(
    url: &str,
    retry: &RetryConfig,
) -> redis::RedisResult<ConnectionManager> {
    retry_with_backoff(|| connect(url), retry).await
}

/// Retry an async operation with exponential backoff.
pub async fn retry_with_backoff<F, Fut, T, E>(mut operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay_ms;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt, "Operation succeeded after retrying");
                }
                return Ok(result);
            }
            Err(e) => {
                attempt += 1;
                if attempt > config.max_retries {
                    warn!(attempts = attempt, error = %e, "Giving up");
                    return Err(e);
                }

                let wait = if config.use_jitter {
                    apply_jitter(delay)
                } else {
                    delay
                };
                warn!(
                    attempt,
                    max_retries = config.max_retries,
                    retry_in_ms = wait,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(wait)).await;

                delay = ((delay as f64 * config.backoff_multiplier) as u64).min(config.max_delay_ms);
            }
        }
    }
}

/// Delay before the next read after `consecutive_errors` failures in a row:
/// 2, 4, 8, 16 then 30 seconds.
pub fn read_error_backoff(consecutive_errors: u32) -> Duration {
    const MAX_BACKOFF_SECS: u64 = 30;
    let secs = 2u64.pow(consecutive_errors.clamp(1, 5));
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

/// Somewhere between 50% and 100% of `delay`
fn apply_jitter(delay: u64) -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    let factor = (RandomState::new().hash_one(std::time::SystemTime::now()) % 50) as f64 / 100.0 + 0.5;
    (delay as f64 * factor) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let jittered = apply_jitter(1000);
            assert!((500..=1000).contains(&jittered));
        }
    }

    #[test]
    fn test_read_error_backoff_is_capped() {
        assert_eq!(read_error_backoff(0), Duration::from_secs(2));
        assert_eq!(read_error_backoff(1), Duration::from_secs(2));
        assert_eq!(read_error_backoff(3), Duration::from_secs(8));
        assert_eq!(read_error_backoff(5), Duration::from_secs(30));
        assert_eq!(read_error_backoff(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let config = RetryConfig::default()
            .with_initial_delay(1)
            .without_jitter();

        let result: Result<u32, String> = retry_with_backoff(
            || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(format!("attempt {n}")) } else { Ok(n) }
            },
            &config,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let config = RetryConfig::default()
            .with_max_retries(2)
            .with_initial_delay(1)
            .without_jitter();

        let result: Result<(), String> = retry_with_backoff(
            || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("refused".to_string())
            },
            &config,
        )
        .await;

        assert_eq!(result.unwrap_err(), "refused");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_blocking_reply_timeout_outlasts_block() {
        assert_eq!(
            blocking_reply_timeout(Duration::from_millis(5_000)),
            Some(Duration::from_millis(7_000))
        );
        assert_eq!(blocking_reply_timeout(Duration::ZERO), None);
    }

    #[tokio::test]
    async fn test_connect_invalid_url() {
        assert!(connect("not-a-url").await.is_err());
        assert!(connect_blocking("not-a-url", Duration::from_secs(1)).await.is_err());
    }
}
