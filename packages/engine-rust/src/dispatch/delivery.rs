//! Unit of work flowing through the dispatch pipeline.

use std::time::Duration;

use futures_util::future::BoxFuture;
use mediator_core::{Exchange, ExchangeError};

/// Future returned by every service in the dispatch pipeline.
pub type DispatchFuture = BoxFuture<'static, Result<Exchange, DispatchError>>;

/// One exchange addressed to a route.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub route_id: String,
    pub exchange: Exchange,
    /// Overrides the pipeline's default timeout for this delivery.
    pub timeout: Option<Duration>,
}

impl Delivery {
    #[must_use]
    pub fn new(route_id: impl Into<String>, exchange: Exchange) -> Self {
        Self {
            route_id: route_id.into(),
            exchange,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Errors produced while dispatching a delivery.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown route: {route_id}")]
    UnknownRoute { route_id: String },
    #[error("delivery timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("dispatcher overloaded, try again later")]
    Overloaded,
    #[error("delivery rejected: {0}")]
    Rejected(String),
    /// The route ran and failed; the exchange is returned as it was left.
    #[error("route {route_id} failed: {error}")]
    Failed {
        route_id: String,
        #[source]
        error: ExchangeError,
        exchange: Box<Exchange>,
    },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    /// Stable label used for metrics and logs.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            DispatchError::UnknownRoute { .. } => "unknown_route",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Overloaded => "overloaded",
            DispatchError::Rejected(_) => "rejected",
            DispatchError::Failed { .. } => "failed",
            DispatchError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_builder() {
        let delivery = Delivery::new("orders", Exchange::new()).with_timeout(Duration::from_millis(5));
        assert_eq!(delivery.route_id, "orders");
        assert_eq!(delivery.timeout, Some(Duration::from_millis(5)));
    }

    #[test]
    fn failed_error_mentions_route_and_cause() {
        let err = DispatchError::Failed {
            route_id: "orders".into(),
            error: ExchangeError::io("disk full"),
            exchange: Box::new(Exchange::new()),
        };
        assert_eq!(err.to_string(), "route orders failed: io error: disk full");
        assert_eq!(err.outcome(), "failed");
    }
}
