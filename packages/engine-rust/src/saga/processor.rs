use std::sync::Arc;

use async_trait::async_trait;
use mediator_core::{deliver, Exchange, ExchangeError, Processor, Value, SAGA_LONG_RUNNING_ACTION};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::coordinator::SagaCoordinator;
use super::service::SagaService;
use super::step::SagaStep;
use super::SagaError;

/// How a route joins the saga carried by the incoming exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaPropagation {
    /// Join the current saga or create one.
    #[default]
    Required,
    /// Always create a new saga; the caller's saga is suspended.
    RequiresNew,
    /// Join the current saga; fail if there is none.
    Mandatory,
    /// Join the current saga if any, otherwise run without one.
    Supports,
    /// Run outside any saga; the caller's saga is suspended.
    NotSupported,
    /// Fail if a saga is present.
    Never,
}

/// Who finalizes a saga created by the processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaCompletionMode {
    /// Complete on success, compensate on failure.
    #[default]
    Auto,
    /// Leave finalization to the application.
    Manual,
}

/// Runs a downstream processor inside a saga.
///
/// The current saga is resolved from the `Long-Running-Action` header; an id
/// that no longer names a live saga counts as no saga.
pub struct SagaProcessor {
    service: Arc<SagaService>,
    next: Arc<dyn Processor>,
    step: Option<Arc<SagaStep>>,
    propagation: SagaPropagation,
    completion: SagaCompletionMode,
}

impl SagaProcessor {
    #[must_use]
    pub fn new(service: Arc<SagaService>, next: Arc<dyn Processor>) -> Self {
        Self {
            service,
            next,
            step: None,
            propagation: SagaPropagation::default(),
            completion: SagaCompletionMode::default(),
        }
    }

    /// Step registered with the saga before the downstream runs.
    #[must_use]
    pub fn with_step(mut self, step: SagaStep) -> Self {
        self.step = Some(Arc::new(step));
        self
    }

    #[must_use]
    pub fn with_propagation(mut self, propagation: SagaPropagation) -> Self {
        self.propagation = propagation;
        self
    }

    #[must_use]
    pub fn with_completion_mode(mut self, completion: SagaCompletionMode) -> Self {
        self.completion = completion;
        self
    }

    #[must_use]
    pub fn propagation(&self) -> SagaPropagation {
        self.propagation
    }

    #[must_use]
    pub fn completion_mode(&self) -> SagaCompletionMode {
        self.completion
    }

    fn current_saga(&self, exchange: &Exchange) -> Option<Arc<SagaCoordinator>> {
        exchange.saga_id().and_then(|id| self.service.get_saga(id))
    }

    async fn run_in_new_saga(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        let saga = self.service.new_saga()?;
        exchange.set_header(SAGA_LONG_RUNNING_ACTION, saga.id());
        debug!(saga_id = %saga.id(), exchange_id = %exchange.id(), "exchange started saga");
        self.run_in(&saga, exchange, true).await
    }

    async fn run_in(
        &self,
        saga: &Arc<SagaCoordinator>,
        exchange: &mut Exchange,
        owned: bool,
    ) -> Result<(), ExchangeError> {
        let finalize = owned && self.completion == SagaCompletionMode::Auto;

        let result = match &self.step {
            Some(step) => match saga.begin_step(exchange, Arc::clone(step)) {
                Ok(()) => deliver(self.next.as_ref(), exchange).await,
                Err(err) => Err(ExchangeError::from(err)),
            },
            None => deliver(self.next.as_ref(), exchange).await,
        };

        if !finalize {
            return result;
        }
        match result {
            Ok(()) => saga.complete().await.map_err(ExchangeError::from),
            Err(err) => {
                if let Err(compensation) = saga.compensate().await {
                    warn!(saga_id = %saga.id(), error = %compensation, "could not compensate failed saga");
                }
                Err(err)
            }
        }
    }
}

fn restore_header(exchange: &mut Exchange, previous: Option<Value>) {
    match previous {
        Some(value) => {
            exchange.set_header(SAGA_LONG_RUNNING_ACTION, value);
        }
        None => {
            exchange.remove_header(SAGA_LONG_RUNNING_ACTION);
        }
    }
}

#[async_trait]
impl Processor for SagaProcessor {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        let current = self.current_saga(exchange);
        match (self.propagation, current) {
            (SagaPropagation::Required, Some(saga))
            | (SagaPropagation::Mandatory, Some(saga))
            | (SagaPropagation::Supports, Some(saga)) => self.run_in(&saga, exchange, false).await,
            (SagaPropagation::Required, None) => self.run_in_new_saga(exchange).await,
            (SagaPropagation::Mandatory, None) => Err(SagaError::SagaRequired.into()),
            (SagaPropagation::Supports, None) | (SagaPropagation::Never, None) => {
                deliver(self.next.as_ref(), exchange).await
            }
            (SagaPropagation::Never, Some(saga)) => Err(SagaError::SagaForbidden {
                saga_id: saga.id().to_string(),
            }
            .into()),
            (SagaPropagation::RequiresNew, _) => {
                let previous = exchange.remove_header(SAGA_LONG_RUNNING_ACTION);
                let result = self.run_in_new_saga(exchange).await;
                restore_header(exchange, previous);
                result
            }
            (SagaPropagation::NotSupported, _) => {
                let previous = exchange.remove_header(SAGA_LONG_RUNNING_ACTION);
                let result = deliver(self.next.as_ref(), exchange).await;
                restore_header(exchange, previous);
                result
            }
        }
    }
}
