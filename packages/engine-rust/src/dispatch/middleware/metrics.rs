//! Metrics middleware for deliveries.
//!
//! Wraps each delivery in a `tracing` span and records a per-route counter
//! (labelled by outcome) and a duration histogram through the `metrics`
//! facade. Without an installed recorder the `metrics` calls are no-ops.

use std::task::{Context, Poll};
use std::time::Instant;

use mediator_core::Exchange;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::dispatch::delivery::{Delivery, DispatchError, DispatchFuture};

/// Counter of finished deliveries, labelled `route` and `outcome`.
pub const DELIVERIES_TOTAL: &str = "mediator_deliveries_total";
/// Histogram of delivery durations in seconds, labelled `route`.
pub const DELIVERY_DURATION_SECONDS: &str = "mediator_delivery_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments deliveries with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records delivery duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Delivery> for MetricsService<S>
where
    S: Service<Delivery, Response = Exchange, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Exchange;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, delivery: Delivery) -> Self::Future {
        let route = delivery.route_id.clone();
        let span = info_span!(
            "delivery",
            route = %route,
            exchange_id = %delivery.exchange.id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(delivery);
        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.outcome(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                metrics::counter!(DELIVERIES_TOTAL, "route" => route.clone(), "outcome" => outcome)
                    .increment(1);
                metrics::histogram!(DELIVERY_DURATION_SECONDS, "route" => route)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => tracing::debug!(duration_ms, outcome, "delivery complete"),
                    Err(err) => tracing::warn!(duration_ms, outcome, error = %err, "delivery failed"),
                }
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mediator_core::{ExchangeError, MockEndpoint, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::dispatch::router::ExchangeRouter;

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let router = ExchangeRouter::new();
        router.register("orders", Arc::new(MockEndpoint::new("mock:orders")));
        let svc = MetricsLayer.layer(router);

        let exchange = svc
            .oneshot(Delivery::new("orders", Exchange::with_body(7_i64)))
            .await
            .unwrap();
        assert_eq!(exchange.body, Value::from(7_i64));
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_errors() {
        let router = ExchangeRouter::new();
        router.register(
            "orders",
            Arc::new(MockEndpoint::new("mock:orders").always_failing(ExchangeError::io("down"))),
        );
        let svc = MetricsLayer.layer(router);

        let err = svc
            .oneshot(Delivery::new("orders", Exchange::new()))
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), "failed");
    }
}
