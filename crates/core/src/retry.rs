use crate::error::PipelineError;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Bounded exponential backoff for provider round trips.
///
/// Delays are `base`, `2 * base`, `4 * base`, ... capped at `32 * base`.
/// Only errors reporting [`PipelineError::is_transient`] are retried.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_retries: u32,
    pub base: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::from_secs(1),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * (1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        kind = error.kind(),
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Rate limits and server errors are worth another attempt; other 4xx are not.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
