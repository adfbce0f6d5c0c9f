//! Load-shedding middleware for deliveries.
//!
//! Rejects deliveries when the dispatcher is overloaded (concurrent count
//! exceeds `max_concurrent_deliveries`) with `DispatchError::Overloaded`.

use std::sync::Arc;
use std::task::{Context, Poll};

use mediator_core::Exchange;
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use crate::dispatch::delivery::{Delivery, DispatchError, DispatchFuture};

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits concurrent deliveries via a semaphore.
///
/// When all permits are taken, incoming deliveries are rejected immediately
/// with `DispatchError::Overloaded` rather than queued.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    /// Create a new `LoadShedLayer` with the given concurrency limit.
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: self.semaphore.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces a concurrency limit shared by all its clones.
#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<Delivery> for LoadShedService<S>
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
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            tracing::debug!(route = %delivery.route_id, "delivery shed");
            return Box::pin(async { Err(DispatchError::Overloaded) });
        };

        let fut = self.inner.call(delivery);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::dispatch::middleware::test_support::{make_delivery, SlowService};

    #[tokio::test]
    async fn allows_deliveries_under_limit() {
        let svc = LoadShedLayer::new(10).layer(SlowService { delay_ms: 1 });
        assert!(svc.oneshot(make_delivery()).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_when_overloaded() {
        let layer = LoadShedLayer::new(1);
        let mut svc = layer.layer(SlowService { delay_ms: 500 });

        let _ = ServiceExt::ready(&mut svc).await.unwrap();
        let in_flight = tokio::spawn(svc.call(make_delivery()));

        let err = svc.call(make_delivery()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Overloaded));

        in_flight.await.unwrap().unwrap();
        assert!(svc.call(make_delivery()).await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_the_limit() {
        let layer = LoadShedLayer::new(1);
        let mut first = layer.layer(SlowService { delay_ms: 200 });
        let mut second = first.clone();

        let held = first.call(make_delivery());
        let err = second.call(make_delivery()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Overloaded));
        drop(held);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(second.call(make_delivery()).await.is_ok());
    }
}
