use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mediator_core::{Endpoint, Expression};

/// Immutable description of one saga step.
///
/// A step names the endpoint that undoes it (compensation), the endpoint
/// that confirms it (completion), options whose values are captured when the
/// step begins and replayed as headers at finalization, and an optional
/// timeout after which a still-running saga is compensated.
#[derive(Clone, Default)]
pub struct SagaStep {
    compensation: Option<Arc<dyn Endpoint>>,
    completion: Option<Arc<dyn Endpoint>>,
    options: BTreeMap<String, Arc<dyn Expression>>,
    timeout: Option<Duration>,
}

impl SagaStep {
    #[must_use]
    pub fn builder() -> SagaStepBuilder {
        SagaStepBuilder::default()
    }

    #[must_use]
    pub fn compensation(&self) -> Option<&Arc<dyn Endpoint>> {
        self.compensation.as_ref()
    }

    #[must_use]
    pub fn completion(&self) -> Option<&Arc<dyn Endpoint>> {
        self.completion.as_ref()
    }

    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, Arc<dyn Expression>> {
        &self.options
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `true` when the step declares no endpoints, no options and no timeout.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compensation.is_none()
            && self.completion.is_none()
            && self.options.is_empty()
            && self.timeout.is_none()
    }
}

impl fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaStep")
            .field("compensation", &self.compensation.as_ref().map(|e| e.uri()))
            .field("completion", &self.completion.as_ref().map(|e| e.uri()))
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for [`SagaStep`]; consumed by [`SagaStepBuilder::build`].
#[derive(Default)]
pub struct SagaStepBuilder {
    step: SagaStep,
}

impl SagaStepBuilder {
    #[must_use]
    pub fn compensation(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.step.compensation = Some(endpoint);
        self
    }

    #[must_use]
    pub fn completion(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.step.completion = Some(endpoint);
        self
    }

    /// Adds an option captured from the exchange when the step begins.
    #[must_use]
    pub fn option(mut self, name: impl Into<String>, expression: Arc<dyn Expression>) -> Self {
        self.step.options.insert(name.into(), expression);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.step.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn build(self) -> SagaStep {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use mediator_core::{expression, MockEndpoint};

    use super::*;

    #[test]
    fn default_step_is_empty() {
        assert!(SagaStep::default().is_empty());
        assert!(SagaStep::builder().build().is_empty());
    }

    #[test]
    fn any_declaration_makes_step_non_empty() {
        let endpoint: Arc<dyn Endpoint> = Arc::new(MockEndpoint::new("mock:undo"));
        assert!(!SagaStep::builder().compensation(endpoint.clone()).build().is_empty());
        assert!(!SagaStep::builder().completion(endpoint).build().is_empty());
        assert!(!SagaStep::builder()
            .option("id", expression::header("id"))
            .build()
            .is_empty());
        assert!(!SagaStep::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .is_empty());
    }

    #[test]
    fn debug_lists_endpoint_uris() {
        let step = SagaStep::builder()
            .compensation(Arc::new(MockEndpoint::new("mock:undo")))
            .build();
        let rendered = format!("{step:?}");
        assert!(rendered.contains("mock:undo"));
    }
}
