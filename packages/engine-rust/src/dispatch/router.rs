//! Delivery routing: dispatches a `Delivery` to the processor registered for its route.

use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use mediator_core::{deliver, Processor};
use tower::Service;

use super::delivery::{Delivery, DispatchError, DispatchFuture};

// ---------------------------------------------------------------------------
// ExchangeRouter
// ---------------------------------------------------------------------------

/// Routes deliveries to processors by `route_id`.
///
/// Routes are plain processors: a load-balanced group, a saga-bound
/// processor or a single endpoint. Clones share the route table, so routes
/// added after the pipeline is built are visible to it.
#[derive(Clone, Default)]
pub struct ExchangeRouter {
    routes: Arc<DashMap<String, Arc<dyn Processor>>>,
}

impl ExchangeRouter {
    /// Create a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the processor for `route_id`.
    pub fn register(&self, route_id: impl Into<String>, processor: Arc<dyn Processor>) {
        self.routes.insert(route_id.into(), processor);
    }

    /// Remove a route, returning its processor.
    pub fn remove(&self, route_id: &str) -> Option<Arc<dyn Processor>> {
        self.routes.remove(route_id).map(|(_, processor)| processor)
    }

    #[must_use]
    pub fn contains(&self, route_id: &str) -> bool {
        self.routes.contains_key(route_id)
    }

    #[must_use]
    pub fn route_ids(&self) -> Vec<String> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Service<Delivery> for ExchangeRouter {
    type Response = mediator_core::Exchange;
    type Error = DispatchError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, delivery: Delivery) -> Self::Future {
        let route = self
            .routes
            .get(&delivery.route_id)
            .map(|entry| Arc::clone(entry.value()));
        Box::pin(async move {
            let Delivery {
                route_id,
                mut exchange,
                ..
            } = delivery;
            let Some(processor) = route else {
                return Err(DispatchError::UnknownRoute { route_id });
            };
            match deliver(processor.as_ref(), &mut exchange).await {
                Ok(()) => Ok(exchange),
                Err(error) => Err(DispatchError::Failed {
                    route_id,
                    error,
                    exchange: Box::new(exchange),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
