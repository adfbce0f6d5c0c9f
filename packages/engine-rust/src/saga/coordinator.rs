//! Per-saga state machine.
//!
//! A coordinator accumulates steps while its saga is running and, once the
//! saga is compensated or completed, walks those steps in reverse order and
//! delivers to each step's compensation or completion endpoint with retry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use mediator_core::{deliver, Endpoint, Exchange, Value, SAGA_LONG_RUNNING_ACTION};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::service::SagaShared;
use super::step::SagaStep;
use super::{SagaError, SagaStatus};

// ---------------------------------------------------------------------------
// Finalization kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finalization {
    Compensation,
    Completion,
}

impl Finalization {
    fn action(self) -> &'static str {
        match self {
            Finalization::Compensation => "compensate",
            Finalization::Completion => "complete",
        }
    }

    fn in_progress(self) -> SagaStatus {
        match self {
            Finalization::Compensation => SagaStatus::Compensating,
            Finalization::Completion => SagaStatus::Completing,
        }
    }

    fn done(self) -> SagaStatus {
        match self {
            Finalization::Compensation => SagaStatus::Compensated,
            Finalization::Completion => SagaStatus::Completed,
        }
    }

    fn endpoint(self, step: &SagaStep) -> Option<&Arc<dyn Endpoint>> {
        match self {
            Finalization::Compensation => step.compensation(),
            Finalization::Completion => step.completion(),
        }
    }
}

impl fmt::Display for Finalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Finalization::Compensation => "compensation",
            Finalization::Completion => "completion",
        })
    }
}

// ---------------------------------------------------------------------------
// SagaCoordinator
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct RegisteredStep {
    step: Arc<SagaStep>,
    options: BTreeMap<String, Value>,
}

/// Coordinates one saga: its registered steps, captured option values and status.
///
/// Status only moves forward (`Running` to `Compensating`/`Completing` to
/// the matching terminal status); every transition out of `Running` is a
/// compare-and-set, so concurrent `compensate`, `complete` and step timeouts
/// race safely and only the winner finalizes.
pub struct SagaCoordinator {
    id: String,
    steps: RwLock<Vec<RegisteredStep>>,
    status: watch::Sender<SagaStatus>,
    shared: Arc<SagaShared>,
}

impl SagaCoordinator {
    pub(crate) fn new(id: String, shared: Arc<SagaShared>) -> Arc<Self> {
        let (status, _) = watch::channel(SagaStatus::Running);
        Arc::new(Self {
            id,
            steps: RwLock::new(Vec::new()),
            status,
            shared,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn status(&self) -> SagaStatus {
        *self.status.borrow()
    }

    /// Number of registered steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.read().len()
    }

    /// Registered steps in registration order.
    #[must_use]
    pub fn steps(&self) -> Vec<Arc<SagaStep>> {
        self.steps
            .read()
            .iter()
            .map(|registered| Arc::clone(&registered.step))
            .collect()
    }

    /// Option values captured when the step at `index` began.
    #[must_use]
    pub fn option_values(&self, index: usize) -> Option<BTreeMap<String, Value>> {
        self.steps
            .read()
            .get(index)
            .map(|registered| registered.options.clone())
    }

    /// Registers `step`, capturing its option values from `exchange`.
    ///
    /// When the step declares a timeout, a one-shot timer is armed on the
    /// shared scheduler; if the saga is still running when it fires, the
    /// saga is compensated.
    ///
    /// # Errors
    ///
    /// - `SagaError::IllegalState` if the saga is no longer running.
    /// - `SagaError::OptionEvaluation` if an option expression fails; the
    ///   step is not registered.
    /// - `SagaError::NotStarted` if the step has a timeout and the service
    ///   has no scheduler.
    pub fn begin_step(self: &Arc<Self>, exchange: &Exchange, step: Arc<SagaStep>) -> Result<(), SagaError> {
        self.ensure_running()?;

        let mut options = BTreeMap::new();
        for (name, expression) in step.options() {
            let value = expression
                .evaluate(exchange)
                .map_err(|source| SagaError::OptionEvaluation {
                    option: name.clone(),
                    source,
                })?;
            options.insert(name.clone(), value);
        }

        let timer = match step.timeout() {
            Some(timeout) => Some((timeout, self.shared.scheduler().ok_or(SagaError::NotStarted)?)),
            None => None,
        };

        {
            let mut steps = self.steps.write();
            self.ensure_running()?;
            steps.push(RegisteredStep {
                step: Arc::clone(&step),
                options,
            });
        }
        debug!(saga_id = %self.id, step = ?step, "saga step registered");

        if let Some((timeout, scheduler)) = timer {
            let coordinator = Arc::clone(self);
            scheduler.schedule(timeout, async move {
                if coordinator.transition(Finalization::Compensation) {
                    debug!(saga_id = %coordinator.id, ?timeout, "saga step timed out");
                    coordinator.finalize(Finalization::Compensation).await;
                }
            });
        }
        Ok(())
    }

    /// Compensates the saga and waits for every compensation to settle.
    ///
    /// Calling it again while compensation is in progress or finished is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// `SagaError::IllegalState` if the saga is completing or completed,
    /// `SagaError::NotStarted` if the saga is still running and the service
    /// has been stopped.
    pub async fn compensate(self: &Arc<Self>) -> Result<(), SagaError> {
        self.finish(Finalization::Compensation).await
    }

    /// Completes the saga and waits for every completion to settle.
    ///
    /// Calling it again while completion is in progress or finished is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// `SagaError::IllegalState` if the saga is compensating or compensated,
    /// `SagaError::NotStarted` if the saga is still running and the service
    /// has been stopped.
    pub async fn complete(self: &Arc<Self>) -> Result<(), SagaError> {
        self.finish(Finalization::Completion).await
    }

    /// Waits until the saga reaches a terminal status and returns it.
    // The borrow guard from `wait_for` must drop before `rx` does.
    #[allow(clippy::let_and_return)]
    pub async fn finalized(&self) -> SagaStatus {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    fn ensure_running(&self) -> Result<(), SagaError> {
        match self.status() {
            SagaStatus::Running => Ok(()),
            status => Err(SagaError::IllegalState {
                action: "begin",
                status,
            }),
        }
    }

    /// CAS `Running -> kind.in_progress()`. Returns `true` for the winner.
    fn transition(&self, kind: Finalization) -> bool {
        self.status.send_if_modified(|status| {
            if *status == SagaStatus::Running {
                *status = kind.in_progress();
                true
            } else {
                false
            }
        })
    }

    async fn finish(self: &Arc<Self>, kind: Finalization) -> Result<(), SagaError> {
        match self.status() {
            SagaStatus::Running => {}
            status if status == kind.in_progress() || status == kind.done() => return Ok(()),
            status => {
                return Err(SagaError::IllegalState {
                    action: kind.action(),
                    status,
                })
            }
        }
        let scheduler = self.shared.scheduler().ok_or(SagaError::NotStarted)?;

        if !self.transition(kind) {
            let status = self.status();
            if status == kind.in_progress() || status == kind.done() {
                return Ok(());
            }
            return Err(SagaError::IllegalState {
                action: kind.action(),
                status,
            });
        }

        // Tracked by the scheduler so that stopping the service drains it.
        let coordinator = Arc::clone(self);
        scheduler
            .spawn(async move { coordinator.finalize(kind).await })
            .await
            .map_err(|e| SagaError::Interrupted(e.to_string()))?;
        Ok(())
    }

    /// Delivers `kind` to every step in reverse order, then sets the terminal
    /// status and evicts the saga. Returns `true` if every delivery succeeded.
    async fn finalize(&self, kind: Finalization) -> bool {
        let steps = self.steps.read().clone();
        let mut success = true;
        for registered in steps.iter().rev() {
            let Some(endpoint) = kind.endpoint(&registered.step) else {
                continue;
            };
            success &= self
                .finalize_step(kind, endpoint.as_ref(), &registered.options)
                .await;
        }

        self.status.send_replace(kind.done());
        self.shared.sagas.remove(&self.id);

        if success {
            debug!(saga_id = %self.id, status = %kind.done(), "saga finalized");
        } else {
            warn!(saga_id = %self.id, status = %kind.done(), "saga finalized with failed {kind} steps");
        }
        success
    }

    async fn finalize_step(
        &self,
        kind: Finalization,
        endpoint: &dyn Endpoint,
        options: &BTreeMap<String, Value>,
    ) -> bool {
        let max_retry_attempts = self.shared.max_retry_attempts();
        let retry_delay = self.shared.retry_delay();

        for attempt in 0..=max_retry_attempts {
            if attempt > 0 {
                let resumed = match self.shared.scheduler() {
                    Some(scheduler) => scheduler.sleep(retry_delay).await,
                    None => false,
                };
                if !resumed {
                    warn!(saga_id = %self.id, uri = endpoint.uri(), attempt, "{kind} abandoned: saga service stopped");
                    return false;
                }
            }

            let mut exchange = endpoint.create_exchange();
            for (name, value) in options {
                exchange.set_header(name.clone(), value.clone());
            }
            exchange.set_header(SAGA_LONG_RUNNING_ACTION, self.id.as_str());

            match deliver(endpoint, &mut exchange).await {
                Ok(()) => return true,
                Err(err) => {
                    debug!(saga_id = %self.id, uri = endpoint.uri(), attempt, error = %err, "{kind} attempt failed");
                }
            }
        }

        warn!(
            saga_id = %self.id,
            uri = endpoint.uri(),
            attempts = u64::from(max_retry_attempts) + 1,
            "{kind} failed after exhausting retries"
        );
        false
    }
}

impl fmt::Debug for SagaCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaCoordinator")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("steps", &self.step_count())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
