use std::fmt;
use std::sync::Arc;

use mediator_core::{ErrorKind, ExpressionDefinition};
use serde::{Deserialize, Serialize};

use super::custom::CustomLoadBalancer;
use super::failover::FailoverLoadBalancer;
use super::random::RandomLoadBalancer;
use super::round_robin::RoundRobinLoadBalancer;
use super::sticky::StickyLoadBalancer;
use super::weighted::{parse_distribution_ratio, WeightedLoadBalancer};
use super::{LoadBalanceError, LoadBalancer, LoadBalancerRegistry};

fn unlimited() -> i32 {
    -1
}

fn comma() -> String {
    ",".to_string()
}

/// Declarative load-balancer configuration.
///
/// Pure data: every [`build`](Self::build) yields a fresh policy with its own
/// selection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadBalancerDefinition {
    RoundRobin,
    Random,
    Failover {
        /// Error kinds that trigger failover; empty means any error.
        #[serde(default)]
        exceptions: Vec<ErrorKind>,
        #[serde(default)]
        round_robin: bool,
        #[serde(default)]
        sticky: bool,
        #[serde(default = "unlimited")]
        maximum_failover_attempts: i32,
    },
    Sticky {
        correlation: ExpressionDefinition,
    },
    Weighted {
        distribution_ratio: String,
        #[serde(default = "comma")]
        distribution_ratio_delimiter: String,
        #[serde(default)]
        round_robin: bool,
    },
    Custom {
        ref_name: String,
    },
}

impl LoadBalancerDefinition {
    /// Builds the runtime policy for `candidates` destinations.
    ///
    /// # Errors
    ///
    /// - `LoadBalanceError::InvalidConfig` for malformed or mismatched weights.
    /// - `LoadBalanceError::UnknownReference` for an unregistered custom policy.
    pub fn build(
        &self,
        candidates: usize,
        registry: &LoadBalancerRegistry,
    ) -> Result<Arc<dyn LoadBalancer>, LoadBalanceError> {
        let balancer: Arc<dyn LoadBalancer> = match self {
            LoadBalancerDefinition::RoundRobin => Arc::new(RoundRobinLoadBalancer::new()),
            LoadBalancerDefinition::Random => Arc::new(RandomLoadBalancer::new()),
            LoadBalancerDefinition::Failover {
                exceptions,
                round_robin,
                sticky,
                maximum_failover_attempts,
            } => Arc::new(
                FailoverLoadBalancer::new()
                    .on_kinds(exceptions.clone())
                    .round_robin(*round_robin)
                    .sticky(*sticky)
                    .maximum_failover_attempts(*maximum_failover_attempts),
            ),
            LoadBalancerDefinition::Sticky { correlation } => {
                Arc::new(StickyLoadBalancer::new(correlation.build()))
            }
            LoadBalancerDefinition::Weighted {
                distribution_ratio,
                distribution_ratio_delimiter,
                round_robin,
            } => {
                let weights = parse_distribution_ratio(distribution_ratio, distribution_ratio_delimiter)?;
                Arc::new(WeightedLoadBalancer::new(weights, *round_robin, candidates)?)
            }
            LoadBalancerDefinition::Custom { ref_name } => {
                Arc::new(CustomLoadBalancer::resolve(ref_name, registry)?)
            }
        };
        tracing::debug!(policy = %self, candidates, "load balancer built");
        Ok(balancer)
    }
}

impl fmt::Display for LoadBalancerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancerDefinition::RoundRobin => f.write_str("round_robin"),
            LoadBalancerDefinition::Random => f.write_str("random"),
            LoadBalancerDefinition::Failover {
                maximum_failover_attempts,
                ..
            } => write!(f, "failover(max={maximum_failover_attempts})"),
            LoadBalancerDefinition::Sticky { correlation } => write!(f, "sticky({correlation})"),
            LoadBalancerDefinition::Weighted {
                distribution_ratio, ..
            } => write!(f, "weighted({distribution_ratio})"),
            LoadBalancerDefinition::Custom { ref_name } => write!(f, "custom({ref_name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use mediator_core::Exchange;

    use super::*;

    #[test]
    fn failover_defaults_from_json() {
        let def: LoadBalancerDefinition = serde_json::from_str(r#"{"type":"failover"}"#).unwrap();
        assert_eq!(
            def,
            LoadBalancerDefinition::Failover {
                exceptions: Vec::new(),
                round_robin: false,
                sticky: false,
                maximum_failover_attempts: -1,
            }
        );
    }

    #[test]
    fn weighted_and_sticky_from_json() {
        let def: LoadBalancerDefinition = serde_json::from_str(
            r#"{"type":"weighted","distribution_ratio":"1;0;0","distribution_ratio_delimiter":";","round_robin":true}"#,
        )
        .unwrap();
        let lb = def.build(3, &LoadBalancerRegistry::new()).unwrap();
        assert_eq!(lb.name(), "weighted");
        for _ in 0..5 {
            assert_eq!(lb.select(3, &Exchange::new()).unwrap(), 0);
        }

        let def: LoadBalancerDefinition = serde_json::from_str(
            r#"{"type":"sticky","correlation":{"type":"header","name":"customer"}}"#,
        )
        .unwrap();
        assert_eq!(def.to_string(), "sticky(header(customer))");
        assert_eq!(def.build(2, &LoadBalancerRegistry::new()).unwrap().name(), "sticky");
    }

    #[test]
    fn failover_exceptions_are_error_kinds() {
        let def: LoadBalancerDefinition = serde_json::from_str(
            r#"{"type":"failover","exceptions":["connect","io"],"maximum_failover_attempts":2}"#,
        )
        .unwrap();
        match &def {
            LoadBalancerDefinition::Failover { exceptions, .. } => {
                assert_eq!(exceptions, &vec![ErrorKind::Connect, ErrorKind::Io]);
            }
            other => panic!("unexpected definition: {other}"),
        }
        assert_eq!(def.build(2, &LoadBalancerRegistry::new()).unwrap().name(), "failover");
    }

    #[test]
    fn weighted_length_mismatch_fails_at_build() {
        let def = LoadBalancerDefinition::Weighted {
            distribution_ratio: "2,3".into(),
            distribution_ratio_delimiter: ",".into(),
            round_robin: false,
        };
        assert!(matches!(
            def.build(3, &LoadBalancerRegistry::new()),
            Err(LoadBalanceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn custom_requires_registration() {
        let registry = LoadBalancerRegistry::new();
        let def = LoadBalancerDefinition::Custom {
            ref_name: "mine".into(),
        };
        assert!(matches!(
            def.build(2, &registry),
            Err(LoadBalanceError::UnknownReference(_))
        ));

        registry.register("mine", Arc::new(RoundRobinLoadBalancer::new()));
        assert_eq!(def.build(2, &registry).unwrap().name(), "custom");
    }

    #[test]
    fn each_build_has_private_state() {
        let registry = LoadBalancerRegistry::new();
        let a = LoadBalancerDefinition::RoundRobin.build(3, &registry).unwrap();
        let b = LoadBalancerDefinition::RoundRobin.build(3, &registry).unwrap();
        let ex = Exchange::new();
        assert_eq!(a.select(3, &ex).unwrap(), 0);
        assert_eq!(a.select(3, &ex).unwrap(), 1);
        assert_eq!(b.select(3, &ex).unwrap(), 0);
    }
}
