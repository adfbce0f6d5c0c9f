use mediator_core::Exchange;
use rand::Rng;

use super::{ensure_candidates, LoadBalanceError, LoadBalancer};

/// Picks a uniformly random candidate.
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, candidates: usize, _exchange: &Exchange) -> Result<usize, LoadBalanceError> {
        ensure_candidates(candidates)?;
        Ok(rand::rng().random_range(0..candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_range_and_reaches_every_candidate() {
        let lb = RandomLoadBalancer::new();
        let ex = Exchange::new();
        let mut hits = [0usize; 4];
        for _ in 0..2_000 {
            hits[lb.select(4, &ex).unwrap()] += 1;
        }
        assert!(hits.iter().all(|&h| h > 0));
    }

    #[test]
    fn single_candidate_always_selected() {
        let lb = RandomLoadBalancer::new();
        assert_eq!(lb.select(1, &Exchange::new()).unwrap(), 0);
    }
}
