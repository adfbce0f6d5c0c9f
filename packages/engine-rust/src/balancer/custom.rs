use std::sync::Arc;

use async_trait::async_trait;
use mediator_core::{Exchange, Processor};

use super::{LoadBalanceError, LoadBalancer, LoadBalancerRegistry};

/// A user policy resolved by reference name; everything is delegated to it.
pub struct CustomLoadBalancer {
    reference: String,
    delegate: Arc<dyn LoadBalancer>,
}

impl CustomLoadBalancer {
    /// Looks up `reference` in `registry`.
    ///
    /// # Errors
    ///
    /// `LoadBalanceError::UnknownReference` if nothing is registered under that name.
    pub fn resolve(reference: &str, registry: &LoadBalancerRegistry) -> Result<Self, LoadBalanceError> {
        let delegate = registry
            .get(reference)
            .ok_or_else(|| LoadBalanceError::UnknownReference(reference.to_string()))?;
        Ok(Self {
            reference: reference.to_string(),
            delegate,
        })
    }

    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

#[async_trait]
impl LoadBalancer for CustomLoadBalancer {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn select(&self, candidates: usize, exchange: &Exchange) -> Result<usize, LoadBalanceError> {
        self.delegate.select(candidates, exchange)
    }

    async fn process(
        &self,
        targets: &[Arc<dyn Processor>],
        exchange: &mut Exchange,
    ) -> Result<(), LoadBalanceError> {
        self.delegate.process(targets, exchange).await
    }
}

#[cfg(test)]
mod tests {
    use mediator_core::MockEndpoint;

    use super::*;

    /// Always sends to the last candidate.
    struct LastOne;

    impl LoadBalancer for LastOne {
        fn name(&self) -> &'static str {
            "last_one"
        }

        fn select(&self, candidates: usize, _exchange: &Exchange) -> Result<usize, LoadBalanceError> {
            candidates.checked_sub(1).ok_or(LoadBalanceError::NoCandidates)
        }
    }

    #[tokio::test]
    async fn delegates_to_registered_policy() {
        let registry = LoadBalancerRegistry::new();
        registry.register("last", Arc::new(LastOne));
        let lb = CustomLoadBalancer::resolve("last", &registry).unwrap();
        assert_eq!(lb.reference(), "last");

        let a = Arc::new(MockEndpoint::new("mock:a"));
        let b = Arc::new(MockEndpoint::new("mock:b"));
        let targets: Vec<Arc<dyn Processor>> = vec![a.clone(), b.clone()];
        lb.process(&targets, &mut Exchange::new()).await.unwrap();

        assert_eq!(a.attempts(), 0);
        assert_eq!(b.received_count(), 1);
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let registry = LoadBalancerRegistry::new();
        assert!(matches!(
            CustomLoadBalancer::resolve("missing", &registry),
            Err(LoadBalanceError::UnknownReference(ref name)) if name == "missing"
        ));
    }
}
