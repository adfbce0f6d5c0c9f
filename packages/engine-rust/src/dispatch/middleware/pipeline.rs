//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::config::DispatchConfig;
use crate::dispatch::router::ExchangeRouter;

/// The fully layered dispatch service. Cheap to clone; clones share the
/// route table and the concurrency limit.
pub type DispatchPipeline = LoadShedService<TimeoutService<MetricsService<ExchangeRouter>>>;

/// Build the dispatch pipeline by wrapping the `ExchangeRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `TimeoutLayer` -- enforce per-delivery timeouts
/// 3. `MetricsLayer` -- record timing and outcome (closest to the actual route)
#[must_use]
pub fn build_dispatch_pipeline(router: ExchangeRouter, config: &DispatchConfig) -> DispatchPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_deliveries))
        .layer(TimeoutLayer::new(config.default_timeout()))
        .layer(MetricsLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use mediator_core::{Exchange, ExchangeError, MockEndpoint, Processor};
    use tower::{Service, ServiceExt};

    use super::*;
    use crate::dispatch::delivery::{Delivery, DispatchError};

    struct Stalled;

    #[async_trait]
    impl Processor for Stalled {
        async fn process(&self, _exchange: &mut Exchange) -> Result<(), ExchangeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let router = ExchangeRouter::new();
        let endpoint = Arc::new(MockEndpoint::new("mock:orders"));
        router.register("orders", endpoint.clone());

        let svc = build_dispatch_pipeline(router, &DispatchConfig::default());
        svc.oneshot(Delivery::new("orders", Exchange::new())).await.unwrap();
        assert_eq!(endpoint.received_count(), 1);
    }

    #[tokio::test]
    async fn pipeline_reports_unknown_route() {
        let svc = build_dispatch_pipeline(ExchangeRouter::new(), &DispatchConfig::default());
        let err = svc
            .oneshot(Delivery::new("missing", Exchange::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownRoute { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_times_out_stalled_routes() {
        let router = ExchangeRouter::new();
        router.register("stalled", Arc::new(Stalled));
        let config = DispatchConfig {
            default_timeout_ms: 100,
            ..DispatchConfig::default()
        };

        let svc = build_dispatch_pipeline(router, &config);
        let err = svc
            .oneshot(Delivery::new("stalled", Exchange::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn pipeline_sheds_over_limit() {
        let router = ExchangeRouter::new();
        router.register("stalled", Arc::new(Stalled));
        let config = DispatchConfig {
            max_concurrent_deliveries: 1,
            ..DispatchConfig::default()
        };

        let mut svc = build_dispatch_pipeline(router, &config);
        let _held = svc.call(Delivery::new("stalled", Exchange::new()));
        let err = svc
            .call(Delivery::new("stalled", Exchange::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Overloaded));
    }
}
