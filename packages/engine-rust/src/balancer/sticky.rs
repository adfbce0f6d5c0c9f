use std::collections::HashMap;
use std::sync::Arc;

use mediator_core::{ErrorKind, Exchange, ExchangeError, Expression, Value};
use parking_lot::Mutex;

use super::round_robin::RoundRobinLoadBalancer;
use super::{ensure_candidates, LoadBalanceError, LoadBalancer};

/// Routes exchanges that share a correlation key to the same candidate.
///
/// The first exchange with a given key is placed by round robin and the
/// choice is remembered. Exchanges whose key evaluates to null are balanced
/// round robin without being remembered.
///
/// The affinity map is unbounded: a key stays remembered until it is
/// forgotten, the map is cleared, or its index falls outside a shrunken
/// candidate list. Callers that own the key lifecycle (a finished customer
/// session, say) should call `forget`.
pub struct StickyLoadBalancer {
    correlation: Arc<dyn Expression>,
    affinity: Mutex<HashMap<String, usize>>,
    fallback: RoundRobinLoadBalancer,
}

impl StickyLoadBalancer {
    #[must_use]
    pub fn new(correlation: Arc<dyn Expression>) -> Self {
        Self {
            correlation,
            affinity: Mutex::new(HashMap::new()),
            fallback: RoundRobinLoadBalancer::new(),
        }
    }

    /// Number of remembered keys.
    #[must_use]
    pub fn remembered(&self) -> usize {
        self.affinity.lock().len()
    }

    /// Drops the affinity of `key`. Returns the index it was bound to.
    pub fn forget(&self, key: &Value) -> Option<usize> {
        self.affinity.lock().remove(&key.to_key())
    }

    /// Drops every remembered affinity.
    pub fn clear(&self) {
        self.affinity.lock().clear();
    }
}

impl LoadBalancer for StickyLoadBalancer {
    fn name(&self) -> &'static str {
        "sticky"
    }

    fn select(&self, candidates: usize, exchange: &Exchange) -> Result<usize, LoadBalanceError> {
        ensure_candidates(candidates)?;
        let key = self.correlation.evaluate(exchange).map_err(|err| {
            LoadBalanceError::Delivery(ExchangeError::new(
                ErrorKind::Validation,
                format!("cannot evaluate correlation key: {err}"),
            ))
        })?;
        if key.is_null() {
            return Ok(self.fallback.next_index(candidates));
        }

        let mut affinity = self.affinity.lock();
        let key = key.to_key();
        match affinity.get(&key).copied() {
            // Candidates may have shrunk since the key was placed.
            Some(index) if index < candidates => Ok(index),
            _ => {
                let index = self.fallback.next_index(candidates);
                affinity.insert(key, index);
                Ok(index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mediator_core::expression;

    use super::*;

    fn keyed(key: &str) -> Exchange {
        Exchange::new().header_with("customer", key)
    }

    #[test]
    fn same_key_sticks_to_first_choice() {
        let lb = StickyLoadBalancer::new(expression::header("customer"));
        let first = lb.select(3, &keyed("alice")).unwrap();
        let other = lb.select(3, &keyed("bob")).unwrap();
        assert_ne!(first, other);
        for _ in 0..5 {
            assert_eq!(lb.select(3, &keyed("alice")).unwrap(), first);
            assert_eq!(lb.select(3, &keyed("bob")).unwrap(), other);
        }
        assert_eq!(lb.remembered(), 2);
    }

    #[test]
    fn null_key_is_round_robin_and_not_remembered() {
        let lb = StickyLoadBalancer::new(expression::header("customer"));
        let picks: Vec<usize> = (0..3).map(|_| lb.select(3, &Exchange::new()).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2]);
        assert_eq!(lb.remembered(), 0);
    }

    #[test]
    fn key_is_replaced_when_candidates_shrink() {
        let lb = StickyLoadBalancer::new(expression::header("customer"));
        lb.select(3, &keyed("a")).unwrap();
        lb.select(3, &keyed("b")).unwrap();
        assert_eq!(lb.select(3, &keyed("c")).unwrap(), 2);
        assert!(lb.select(2, &keyed("c")).unwrap() < 2);
    }

    #[test]
    fn forgotten_keys_are_placed_again() {
        let lb = StickyLoadBalancer::new(expression::header("customer"));
        let first = lb.select(3, &keyed("alice")).unwrap();
        lb.select(3, &keyed("bob")).unwrap();

        assert_eq!(lb.forget(&Value::from("alice")), Some(first));
        assert_eq!(lb.forget(&Value::from("alice")), None);
        assert_eq!(lb.remembered(), 1);
        assert_eq!(lb.select(3, &keyed("alice")).unwrap(), 2);

        lb.clear();
        assert_eq!(lb.remembered(), 0);
    }

    #[test]
    fn failing_correlation_is_reported() {
        let lb = StickyLoadBalancer::new(expression::required_header("customer"));
        assert!(matches!(
            lb.select(2, &Exchange::new()),
            Err(LoadBalanceError::Delivery(ref e)) if e.kind == ErrorKind::Validation
        ));
    }

    #[test]
    fn empty_candidates_rejected() {
        let lb = StickyLoadBalancer::new(expression::header("customer"));
        assert!(matches!(lb.select(0, &keyed("a")), Err(LoadBalanceError::NoCandidates)));
    }
}
