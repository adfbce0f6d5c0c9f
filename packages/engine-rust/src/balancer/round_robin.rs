use std::sync::atomic::{AtomicUsize, Ordering};

use mediator_core::Exchange;

use super::{ensure_candidates, LoadBalanceError, LoadBalancer};

/// Cycles through candidates in order.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    counter: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the counter and maps it onto `candidates`. `candidates` must be non-zero.
    pub(crate) fn next_index(&self, candidates: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % candidates
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, candidates: usize, _exchange: &Exchange) -> Result<usize, LoadBalanceError> {
        ensure_candidates(candidates)?;
        Ok(self.next_index(candidates))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_candidates_rejected() {
        let lb = RoundRobinLoadBalancer::new();
        assert!(matches!(
            lb.select(0, &Exchange::new()),
            Err(LoadBalanceError::NoCandidates)
        ));
    }

    #[test]
    fn cycles_in_order() {
        let lb = RoundRobinLoadBalancer::new();
        let ex = Exchange::new();
        let picks: Vec<usize> = (0..7).map(|_| lb.select(3, &ex).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    proptest! {
        #[test]
        fn n_plus_one_selections_cover_all_and_wrap(n in 1usize..32) {
            let lb = RoundRobinLoadBalancer::new();
            let ex = Exchange::new();
            let picks: Vec<usize> = (0..=n).map(|_| lb.select(n, &ex).unwrap()).collect();
            let seen: HashSet<usize> = picks[..n].iter().copied().collect();
            prop_assert_eq!(seen.len(), n);
            prop_assert_eq!(picks[n], picks[0]);
        }
    }
}
