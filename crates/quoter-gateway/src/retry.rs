//! Retry of transient gateway failures.
//!
//! Transient errors (timeouts, connection drops, rate limits, 5xx) are
//! retried with exponential backoff and jitter up to `max_attempts`; the
//! last error is what the caller sees. Fatal errors return immediately.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quoter_telemetry::Metrics;

use crate::error::GatewayResult;
use crate::gateway::{BoxFuture, DynGateway, OrderGateway};
use crate::types::{AmendRequest, BatchOutcome, CancelTarget, OrderSnapshot, PlaceAck, PlaceRequest};

/// Backoff schedule between logical retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Upper bound of any single wait.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    3_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    /// Deterministic ceiling for the wait after failed attempt `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = self.factor.max(1.0).powi(attempt.min(30) as i32);
        let ms = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Wait after failed attempt `attempt`, with equal jitter: half the
    /// ceiling plus a random share of the other half, never above
    /// `max_delay_ms`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        let half = ceiling / 2;
        let jitter = if half > 0 {
            rand::rng().random_range(0..=half)
        } else {
            0
        };
        let mut delay = Duration::from_millis(ceiling - half + jitter);
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }
        delay.min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Gateway wrapper that retries transient failures.
pub struct RetryingGateway {
    inner: DynGateway,
    policy: BackoffPolicy,
}

impl RetryingGateway {
    pub fn new(inner: DynGateway, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    async fn with_retry<'a, T, F>(&'a self, op: &'static str, mut call: F) -> GatewayResult<T>
    where
        F: FnMut(&'a dyn OrderGateway) -> BoxFuture<'a, GatewayResult<T>> + Send + 'a,
        T: Send,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match call(self.inner.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    let delay = self.policy.delay(attempt, err.retry_after);
                    Metrics::gateway_retry(op, err.code.as_str());
                    debug!(
                        op,
                        attempt = attempt + 1,
                        code = %err.code,
                        delay_ms = delay.as_millis() as u64,
                        "Transient gateway error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(op, attempts, error = %err, "Gateway retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl OrderGateway for RetryingGateway {
    fn place(&self, request: PlaceRequest) -> BoxFuture<'_, GatewayResult<PlaceAck>> {
        Box::pin(self.with_retry("place", move |gw| gw.place(request.clone())))
    }

    fn cancel(&self, target: CancelTarget) -> BoxFuture<'_, GatewayResult<()>> {
        Box::pin(self.with_retry("cancel", move |gw| gw.cancel(target.clone())))
    }

    fn amend(&self, request: AmendRequest) -> BoxFuture<'_, GatewayResult<()>> {
        Box::pin(self.with_retry("amend", move |gw| gw.amend(request.clone())))
    }

    fn query_active(
        &self,
        symbol: Option<String>,
    ) -> BoxFuture<'_, GatewayResult<Vec<OrderSnapshot>>> {
        Box::pin(self.with_retry("query_active", move |gw| {
            gw.query_active(symbol.clone())
        }))
    }

    fn query_history(
        &self,
        symbol: Option<String>,
        limit: usize,
    ) -> BoxFuture<'_, GatewayResult<Vec<OrderSnapshot>>> {
        Box::pin(self.with_retry("query_history", move |gw| {
            gw.query_history(symbol.clone(), limit)
        }))
    }

    // Batches are not retried as a whole: a retry would resend items that
    // already succeeded.
    fn batch_place(
        &self,
        symbol: String,
        requests: Vec<PlaceRequest>,
    ) -> BoxFuture<'_, BatchOutcome<PlaceAck>> {
        self.inner.batch_place(symbol, requests)
    }

    fn batch_cancel(
        &self,
        symbol: String,
        targets: Vec<CancelTarget>,
    ) -> BoxFuture<'_, BatchOutcome<()>> {
        self.inner.batch_cancel(symbol, targets)
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }
}
