//! Fault injection around a gateway.
//!
//! Adds latency and synthetic rejects to places and amends so the lifecycle
//! manager's fallback paths can be exercised against a live-looking venue.
//! Cancels and queries pass through untouched.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, DynGateway, OrderGateway};
use crate::types::{AmendRequest, BatchOutcome, CancelTarget, OrderSnapshot, PlaceAck, PlaceRequest};

/// Chaos knobs. Probabilities are in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaosConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub extra_latency_ms: u64,
    #[serde(default)]
    pub latency_probability: f64,
    #[serde(default)]
    pub reject_probability: f64,
}

/// Gateway wrapper that injects faults.
pub struct ChaosGateway {
    inner: DynGateway,
    config: ChaosConfig,
}

enum Fault {
    None,
    Delay(Duration),
    Reject,
}

impl ChaosGateway {
    pub fn new(inner: DynGateway, config: ChaosConfig) -> Self {
        Self { inner, config }
    }

    fn roll(&self) -> Fault {
        if !self.config.enabled {
            return Fault::None;
        }
        let mut rng = rand::rng();
        if rng.random_bool(self.config.reject_probability.clamp(0.0, 1.0)) {
            return Fault::Reject;
        }
        if self.config.extra_latency_ms > 0
            && rng.random_bool(self.config.latency_probability.clamp(0.0, 1.0))
        {
            return Fault::Delay(Duration::from_millis(self.config.extra_latency_ms));
        }
        Fault::None
    }

    async fn inject(&self, op: &'static str) -> GatewayResult<()> {
        match self.roll() {
            Fault::None => Ok(()),
            Fault::Delay(delay) => {
                debug!(op, delay_ms = delay.as_millis() as u64, "Chaos latency injected");
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Fault::Reject => {
                debug!(op, "Chaos reject injected");
                Err(GatewayError::rejected(format!("chaos: injected {op} reject")))
            }
        }
    }
}

impl OrderGateway for ChaosGateway {
    fn place(&self, request: PlaceRequest) -> BoxFuture<'_, GatewayResult<PlaceAck>> {
        Box::pin(async move {
            self.inject("place").await?;
            self.inner.place(request).await
        })
    }

    fn cancel(&self, target: CancelTarget) -> BoxFuture<'_, GatewayResult<()>> {
        self.inner.cancel(target)
    }

    fn amend(&self, request: AmendRequest) -> BoxFuture<'_, GatewayResult<()>> {
        Box::pin(async move {
            self.inject("amend").await?;
            self.inner.amend(request).await
        })
    }

    fn query_active(
        &self,
        symbol: Option<String>,
    ) -> BoxFuture<'_, GatewayResult<Vec<OrderSnapshot>>> {
        self.inner.query_active(symbol)
    }

    fn query_history(
        &self,
        symbol: Option<String>,
        limit: usize,
    ) -> BoxFuture<'_, GatewayResult<Vec<OrderSnapshot>>> {
        self.inner.query_history(symbol, limit)
    }

    fn batch_place(
        &self,
        symbol: String,
        requests: Vec<PlaceRequest>,
    ) -> BoxFuture<'_, BatchOutcome<PlaceAck>> {
        Box::pin(async move {
            if let Err(err) = self.inject("batch_place").await {
                return BatchOutcome::new(requests.iter().map(|_| Err(err.clone())).collect());
            }
            self.inner.batch_place(symbol, requests).await
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperGateway;
    use quoter_core::{ClientOrderId, OrderRequest, OrderSide, Price, Size};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn request() -> PlaceRequest {
        PlaceRequest {
            client_order_id: ClientOrderId::from("c1"),
            order: OrderRequest::limit(
                "ETHUSDT",
                OrderSide::Buy,
                Size::new(dec!(1)),
                Price::new(dec!(3000)),
            ),
        }
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let paper = Arc::new(PaperGateway::new());
        let chaos = ChaosGateway::new(
            paper.clone(),
            ChaosConfig {
                enabled: false,
                reject_probability: 1.0,
                ..Default::default()
            },
        );
        assert!(chaos.place(request()).await.is_ok());
        assert_eq!(paper.active_count(), 1);
    }

    #[tokio::test]
    async fn test_certain_reject_never_reaches_venue() {
        let paper = Arc::new(PaperGateway::new());
        let chaos = ChaosGateway::new(
            paper.clone(),
            ChaosConfig {
                enabled: true,
                reject_probability: 1.0,
                ..Default::default()
            },
        );
        let err = chaos.place(request()).await.unwrap_err();
        assert!(err.message.contains("chaos"));
        assert_eq!(paper.active_count(), 0);
    }

    #[tokio::test]
    async fn test_latency_injection_delays() {
        let paper = Arc::new(PaperGateway::new());
        let chaos = ChaosGateway::new(
            paper,
            ChaosConfig {
                enabled: true,
                extra_latency_ms: 20,
                latency_probability: 1.0,
                reject_probability: 0.0,
            },
        );
        let start = std::time::Instant::now();
        chaos.place(request()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
