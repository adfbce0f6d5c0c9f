//! In-memory saga coordination.
//!
//! 1. **Steps** (`step`): compensation/completion endpoints, captured options, timeout
//! 2. **Coordinator** (`coordinator`): per-saga state machine and reverse-order finalization
//! 3. **Service** (`service`): registry of coordinators and owner of the shared scheduler
//! 4. **Processor** (`processor`): binds routed exchanges to sagas by propagation mode

pub mod coordinator;
pub mod processor;
pub mod service;
pub mod step;

use std::fmt;

use mediator_core::{ExchangeError, ExpressionError};

pub use coordinator::SagaCoordinator;
pub use processor::{SagaCompletionMode, SagaProcessor, SagaPropagation};
pub use service::SagaService;
pub use step::{SagaStep, SagaStepBuilder};

/// Lifecycle of a saga. Transitions only move forward:
/// `Running -> Compensating -> Compensated` or `Running -> Completing -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaStatus {
    Running,
    Compensating,
    Compensated,
    Completing,
    Completed,
}

impl SagaStatus {
    /// `true` for `Compensated` and `Completed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaStatus::Compensated | SagaStatus::Completed)
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SagaStatus::Running => "RUNNING",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Completing => "COMPLETING",
            SagaStatus::Completed => "COMPLETED",
        })
    }
}

/// Errors surfaced by saga operations.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("cannot {action}: status is {status}")]
    IllegalState {
        action: &'static str,
        status: SagaStatus,
    },
    #[error("cannot evaluate saga option '{option}'")]
    OptionEvaluation {
        option: String,
        #[source]
        source: ExpressionError,
    },
    #[error("saga service is not started")]
    NotStarted,
    #[error("exchange is not bound to a saga but the route requires one")]
    SagaRequired,
    #[error("exchange is bound to saga {saga_id} but the route forbids sagas")]
    SagaForbidden { saga_id: String },
    #[error("finalization task did not finish: {0}")]
    Interrupted(String),
}

impl From<SagaError> for ExchangeError {
    fn from(err: SagaError) -> Self {
        ExchangeError::illegal_state(err.to_string())
    }
}
