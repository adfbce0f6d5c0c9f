//! Timeout middleware for deliveries.
//!
//! Rejects deliveries that exceed their timeout with `DispatchError::Timeout`.

use std::task::{Context, Poll};
use std::time::Duration;

use mediator_core::Exchange;
use tower::{Layer, Service};

use crate::dispatch::delivery::{Delivery, DispatchError, DispatchFuture};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-delivery timeout enforcement.
///
/// A delivery's own `timeout` wins; otherwise the layer default applies.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    default_timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            default_timeout: self.default_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces per-delivery timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    default_timeout: Duration,
}

impl<S> Service<Delivery> for TimeoutService<S>
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
        let duration = delivery.timeout.unwrap_or(self.default_timeout);
        let fut = self.inner.call(delivery);
        Box::pin(async move {
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                #[allow(clippy::cast_possible_truncation)]
                Err(_elapsed) => Err(DispatchError::Timeout {
                    timeout_ms: duration.as_millis() as u64,
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::dispatch::middleware::test_support::{make_delivery, SlowService};

    #[tokio::test(start_paused = true)]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer::new(Duration::from_secs(1)).layer(SlowService { delay_ms: 10 });
        assert!(svc.oneshot(make_delivery()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_applies() {
        let svc = TimeoutLayer::new(Duration::from_millis(50)).layer(SlowService { delay_ms: 200 });
        let err = svc.oneshot(make_delivery()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_timeout_overrides_default() {
        let svc = TimeoutLayer::new(Duration::from_secs(10)).layer(SlowService { delay_ms: 200 });
        let delivery = make_delivery().with_timeout(Duration::from_millis(20));
        let err = svc.oneshot(delivery).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 20 }));
    }
}
