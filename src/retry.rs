//! Bounded retry with a deterministic delay sequence
//! =================================================
//!
//! Every fallible I/O step in this crate (downloads, directory deletion) runs
//! through a [`RetryPolicy`]. The delay sequence is fully computed at
//! construction time so tests can assert the exact schedule; there is no
//! jitter on purpose.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PgEmbedError, PgEmbedResult};

/// Download schedule used by the provisioning pipeline: 1 s, 2 s, 4 s.
pub const DOWNLOAD_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// A precomputed sequence of waits between attempts.
///
/// An operation is tried `delays.len() + 1` times in total; the `n`-th retry
/// waits `delays[n - 1]` first. An empty sequence means a single attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Retry with an explicit list of waits, e.g. [`DOWNLOAD_DELAYS`].
    pub fn fixed(delays: impl Into<Vec<Duration>>) -> Self {
        Self {
            delays: delays.into(),
        }
    }

    /// Retry `retries` times with waits `initial * factor^(n - 1)`.
    pub fn exponential(retries: u32, initial: Duration, factor: u32) -> Self {
        let delays = (0..retries)
            .map(|n| initial * factor.pow(n))
            .collect::<Vec<_>>();
        Self { delays }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Run `f` until it succeeds or the schedule is exhausted, sleeping the
    /// configured delay between attempts. The final failure is wrapped as
    /// [`PgEmbedError::Provisioning`] naming `operation`.
    pub fn execute<T, E, F>(&self, operation: &'static str, mut f: F) -> PgEmbedResult<T>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1usize;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if attempt <= self.delays.len() => {
                    let delay = self.delays[attempt - 1];
                    crate::warn!(
                        "{operation} failed on attempt {attempt}/{}: {e}; retrying in {delay:?}",
                        self.max_attempts()
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(PgEmbedError::Provisioning {
                        operation,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// Asynchronous form of [`execute`](Self::execute) with identical
    /// semantics, except that [`PgEmbedError::Cancelled`] is returned
    /// immediately: a cancelled attempt never consumes a retry slot.
    pub async fn execute_async<T, F, Fut>(
        &self,
        operation: &'static str,
        mut f: F,
    ) -> PgEmbedResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = PgEmbedResult<T>>,
    {
        let mut attempt = 1usize;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e @ PgEmbedError::Cancelled) => return Err(e),
                Err(e) if attempt <= self.delays.len() => {
                    let delay = self.delays[attempt - 1];
                    crate::warn!(
                        "{operation} failed on attempt {attempt}/{}: {e}; retrying in {delay:?}",
                        self.max_attempts()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(PgEmbedError::Provisioning {
                        operation,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}
