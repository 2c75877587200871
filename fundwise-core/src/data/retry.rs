//! Bounded retries with exponential backoff and a per-attempt timeout.
//!
//! Every upstream call goes through [`fetch_with_retry`]. Each attempt runs on
//! a helper thread and is abandoned after `timeout`; a timeout is reported as
//! `UpstreamUnavailable`, exactly like a network failure. A hung source can
//! leave its helper thread running, but the pipeline itself never blocks past
//! the timeout.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::{DataError, FetchRequest, UpstreamSource};
use super::table::Table;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests and offline runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            timeout_secs: 30,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Backoff before `attempt` (1-based; attempt 1 has no delay), with up to
    /// 10% jitter.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let base = Duration::from_millis(self.base_delay_ms) * 2u32.saturating_pow(attempt - 2);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base_delay_ms / 10);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Run one request against `source`, retrying retryable failures.
pub fn fetch_with_retry(
    source: &Arc<dyn UpstreamSource>,
    request: &FetchRequest,
    policy: &RetryPolicy,
) -> Result<Table, DataError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match fetch_with_timeout(source, request, policy.timeout()) {
            Ok(table) => {
                debug!(
                    source = source.name(),
                    endpoint = %request.endpoint,
                    subject = %request.subject,
                    rows = table.len(),
                    attempt,
                    "upstream fetch ok"
                );
                return Ok(table);
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    source = source.name(),
                    subject = %request.subject,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "upstream fetch failed"
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| DataError::unavailable(source.name(), "no attempts made")))
}

fn fetch_with_timeout(
    source: &Arc<dyn UpstreamSource>,
    request: &FetchRequest,
    timeout: Duration,
) -> Result<Table, DataError> {
    let (tx, rx) = mpsc::channel();
    let worker_source = Arc::clone(source);
    let worker_request = request.clone();

    std::thread::Builder::new()
        .name(format!("fetch-{}", source.name()))
        .spawn(move || {
            let _ = tx.send(worker_source.fetch(&worker_request));
        })
        .map_err(|e| DataError::unavailable(source.name(), format!("spawn failed: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(DataError::unavailable(
            source.name(),
            format!("timed out after {}s", timeout.as_secs()),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(DataError::unavailable(
            source.name(),
            "source panicked during fetch",
        )),
    }
}
