use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExchangeError;
use crate::exchange::Exchange;

/// A step that handles an exchange: a connector producer, a route, or a
/// load-balanced group of destinations.
///
/// Implementations may either return `Err` or record the failure on the
/// exchange; callers treat both as a failed delivery (see [`deliver`]).
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process the exchange in place.
    async fn process(&self, exchange: &mut Exchange) -> Result<(), ExchangeError>;
}

#[async_trait]
impl<P: Processor + ?Sized> Processor for Arc<P> {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        (**self).process(exchange).await
    }
}

/// Addressable destination able to create outbound exchanges.
pub trait Endpoint: Processor {
    /// URI identifying this endpoint (e.g. `"mock:payments"`).
    fn uri(&self) -> &str;

    /// Builds a blank exchange addressed to this endpoint.
    fn create_exchange(&self) -> Exchange {
        Exchange::new()
    }
}

/// Runs a processor and folds both failure channels into one result.
///
/// A returned `Err` is also recorded on the exchange; a failure recorded on
/// the exchange by the processor is returned as `Err`.
///
/// # Errors
///
/// Returns the processor's error, or the exception it left on the exchange.
pub async fn deliver<P: Processor + ?Sized>(
    processor: &P,
    exchange: &mut Exchange,
) -> Result<(), ExchangeError> {
    match processor.process(exchange).await {
        Ok(()) => match exchange.exception() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        },
        Err(err) => {
            exchange.set_exception(err.clone());
            Err(err)
        }
    }
}
