//! Load-balancing policies that pick one destination among several.
//!
//! Every policy implements [`LoadBalancer`]. Most only decide *which*
//! candidate gets an exchange (`select`); failover additionally drives
//! redelivery and overrides `process`. [`LoadBalancedProcessor`] binds a
//! policy to its targets so it can be used anywhere a processor is expected.

pub mod custom;
pub mod definition;
pub mod failover;
pub mod random;
pub mod round_robin;
pub mod sticky;
pub mod weighted;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use mediator_core::{deliver, ErrorKind, Exchange, ExchangeError, Processor};

pub use custom::CustomLoadBalancer;
pub use definition::LoadBalancerDefinition;
pub use failover::{FailoverLoadBalancer, FailoverMatcher};
pub use random::RandomLoadBalancer;
pub use round_robin::RoundRobinLoadBalancer;
pub use sticky::StickyLoadBalancer;
pub use weighted::WeightedLoadBalancer;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by load-balancing policies.
#[derive(Debug, thiserror::Error)]
pub enum LoadBalanceError {
    #[error("no candidates to balance across")]
    NoCandidates,
    /// Every allowed failover attempt failed. `attempts` counts failovers
    /// after the initial delivery.
    #[error("failover exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: ExchangeError },
    #[error("delivery failed: {0}")]
    Delivery(#[source] ExchangeError),
    #[error("invalid load balancer configuration: {0}")]
    InvalidConfig(String),
    #[error("no load balancer registered under '{0}'")]
    UnknownReference(String),
}

impl From<LoadBalanceError> for ExchangeError {
    fn from(err: LoadBalanceError) -> Self {
        match err {
            LoadBalanceError::Delivery(inner) => inner,
            LoadBalanceError::InvalidConfig(_) | LoadBalanceError::UnknownReference(_) => {
                ExchangeError::new(ErrorKind::Validation, err.to_string())
            }
            LoadBalanceError::NoCandidates | LoadBalanceError::Exhausted { .. } => {
                ExchangeError::delivery(err.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LoadBalancer trait
// ---------------------------------------------------------------------------

/// A policy choosing which candidate receives an exchange.
///
/// Mutable selection state (counters, affinity maps, runtime weights) is
/// private to each instance; two instances built from the same definition
/// never share it.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Short policy name used in logs.
    fn name(&self) -> &'static str;

    /// Picks the index of the candidate that should receive `exchange`.
    ///
    /// # Errors
    ///
    /// `LoadBalanceError::NoCandidates` when `candidates` is zero; policies
    /// with static configuration may also report `InvalidConfig`.
    fn select(&self, candidates: usize, exchange: &Exchange) -> Result<usize, LoadBalanceError>;

    /// Delivers `exchange` to the selected target.
    ///
    /// # Errors
    ///
    /// Selection errors, or `LoadBalanceError::Delivery` with the target's failure.
    async fn process(
        &self,
        targets: &[Arc<dyn Processor>],
        exchange: &mut Exchange,
    ) -> Result<(), LoadBalanceError> {
        let index = self.select(targets.len(), exchange)?;
        let target = targets.get(index).ok_or(LoadBalanceError::NoCandidates)?;
        deliver(target.as_ref(), exchange)
            .await
            .map_err(LoadBalanceError::Delivery)
    }
}

pub(crate) fn ensure_candidates(candidates: usize) -> Result<(), LoadBalanceError> {
    if candidates == 0 {
        Err(LoadBalanceError::NoCandidates)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoadBalancedProcessor
// ---------------------------------------------------------------------------

/// A policy bound to its targets, usable as a route.
pub struct LoadBalancedProcessor {
    balancer: Arc<dyn LoadBalancer>,
    targets: Vec<Arc<dyn Processor>>,
}

impl LoadBalancedProcessor {
    #[must_use]
    pub fn new(balancer: Arc<dyn LoadBalancer>, targets: Vec<Arc<dyn Processor>>) -> Self {
        Self { balancer, targets }
    }

    #[must_use]
    pub fn balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.balancer
    }

    #[must_use]
    pub fn targets(&self) -> &[Arc<dyn Processor>] {
        &self.targets
    }
}

#[async_trait]
impl Processor for LoadBalancedProcessor {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        match self.balancer.process(&self.targets, exchange).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = ExchangeError::from(err);
                exchange.set_exception(err.clone());
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LoadBalancerRegistry
// ---------------------------------------------------------------------------

/// User-supplied policies addressable by reference name.
#[derive(Default)]
pub struct LoadBalancerRegistry {
    entries: DashMap<String, Arc<dyn LoadBalancer>>,
}

impl LoadBalancerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `balancer` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, balancer: Arc<dyn LoadBalancer>) {
        self.entries.insert(name.into(), balancer);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn LoadBalancer>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
