use mediator_core::Exchange;
use parking_lot::Mutex;
use rand::Rng;

use super::{ensure_candidates, LoadBalanceError, LoadBalancer};

/// Parses a ratio list such as `"2,3,5"`.
///
/// # Errors
///
/// `LoadBalanceError::InvalidConfig` if an entry is not a non-negative integer.
pub fn parse_distribution_ratio(ratio: &str, delimiter: &str) -> Result<Vec<u32>, LoadBalanceError> {
    if delimiter.is_empty() {
        return Err(LoadBalanceError::InvalidConfig(
            "distribution ratio delimiter must not be empty".to_string(),
        ));
    }
    ratio
        .split(delimiter)
        .map(|part| {
            part.trim().parse::<u32>().map_err(|_| {
                LoadBalanceError::InvalidConfig(format!("invalid distribution ratio entry '{part}'"))
            })
        })
        .collect()
}

#[derive(Debug)]
struct Cycle {
    remaining: Vec<u32>,
    cursor: usize,
}

/// Distributes exchanges in proportion to integer weights.
///
/// In random mode each selection draws against the cumulative weights. In
/// round-robin mode candidates are visited in order, each consuming one unit
/// of its remaining weight; once every weight is spent they are all reset.
#[derive(Debug)]
pub struct WeightedLoadBalancer {
    weights: Vec<u32>,
    total: u64,
    round_robin: bool,
    cycle: Mutex<Cycle>,
}

impl WeightedLoadBalancer {
    /// Validates `weights` against the number of candidates.
    ///
    /// # Errors
    ///
    /// `LoadBalanceError::InvalidConfig` if the lengths differ or all weights are zero.
    pub fn new(weights: Vec<u32>, round_robin: bool, candidates: usize) -> Result<Self, LoadBalanceError> {
        if weights.len() != candidates {
            return Err(LoadBalanceError::InvalidConfig(format!(
                "distribution ratio has {} entries but there are {candidates} candidates",
                weights.len()
            )));
        }
        let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
        if total == 0 {
            return Err(LoadBalanceError::InvalidConfig(
                "distribution ratio must contain a positive weight".to_string(),
            ));
        }
        Ok(Self {
            cycle: Mutex::new(Cycle {
                remaining: weights.clone(),
                cursor: 0,
            }),
            weights,
            total,
            round_robin,
        })
    }

    #[must_use]
    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    fn select_random(&self) -> usize {
        let mut draw = rand::rng().random_range(0..self.total);
        for (index, weight) in self.weights.iter().enumerate() {
            let weight = u64::from(*weight);
            if draw < weight {
                return index;
            }
            draw -= weight;
        }
        // Unreachable while draw < total.
        self.weights.len() - 1
    }

    fn select_round_robin(&self) -> usize {
        let mut cycle = self.cycle.lock();
        if cycle.remaining.iter().all(|w| *w == 0) {
            cycle.remaining.clone_from(&self.weights);
            cycle.cursor = 0;
        }
        loop {
            if cycle.cursor >= cycle.remaining.len() {
                cycle.cursor = 0;
            }
            let index = cycle.cursor;
            cycle.cursor += 1;
            if cycle.remaining[index] > 0 {
                cycle.remaining[index] -= 1;
                return index;
            }
        }
    }
}

impl LoadBalancer for WeightedLoadBalancer {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn select(&self, candidates: usize, _exchange: &Exchange) -> Result<usize, LoadBalanceError> {
        ensure_candidates(candidates)?;
        if candidates != self.weights.len() {
            return Err(LoadBalanceError::InvalidConfig(format!(
                "weighted policy built for {} candidates, got {candidates}",
                self.weights.len()
            )));
        }
        Ok(if self.round_robin {
            self.select_round_robin()
        } else {
            self.select_random()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picks(lb: &WeightedLoadBalancer, count: usize) -> Vec<usize> {
        let ex = Exchange::new();
        (0..count).map(|_| lb.select(lb.weights().len(), &ex).unwrap()).collect()
    }

    #[test]
    fn parses_ratios_with_custom_delimiter() {
        assert_eq!(parse_distribution_ratio("2, 3 ,5", ",").unwrap(), vec![2, 3, 5]);
        assert_eq!(parse_distribution_ratio("1;0;4", ";").unwrap(), vec![1, 0, 4]);
        assert!(matches!(
            parse_distribution_ratio("1,x", ","),
            Err(LoadBalanceError::InvalidConfig(_))
        ));
        assert!(parse_distribution_ratio("1,2", "").is_err());
    }

    #[test]
    fn rejects_mismatched_or_zero_weights() {
        assert!(matches!(
            WeightedLoadBalancer::new(vec![1, 2], true, 3),
            Err(LoadBalanceError::InvalidConfig(_))
        ));
        assert!(matches!(
            WeightedLoadBalancer::new(vec![0, 0], false, 2),
            Err(LoadBalanceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn single_positive_weight_always_wins_in_round_robin() {
        let lb = WeightedLoadBalancer::new(vec![1, 0, 0], true, 3).unwrap();
        assert!(picks(&lb, 20).iter().all(|&i| i == 0));
    }

    #[test]
    fn round_robin_cycles_proportionally() {
        let lb = WeightedLoadBalancer::new(vec![2, 3, 5], true, 3).unwrap();
        let first = picks(&lb, 10);
        assert_eq!(first, vec![0, 1, 2, 0, 1, 2, 1, 2, 2, 2]);
        // weights reset once spent
        assert_eq!(picks(&lb, 10), first);
    }

    #[test]
    fn random_mode_never_picks_zero_weight() {
        let lb = WeightedLoadBalancer::new(vec![0, 3, 0, 1], false, 4).unwrap();
        let mut hits = [0usize; 4];
        for index in picks(&lb, 2_000) {
            hits[index] += 1;
        }
        assert_eq!(hits[0], 0);
        assert_eq!(hits[2], 0);
        assert!(hits[1] > hits[3]);
        assert!(hits[3] > 0);
    }

    #[test]
    fn candidate_count_must_match_at_selection() {
        let lb = WeightedLoadBalancer::new(vec![1, 1], true, 2).unwrap();
        assert!(matches!(
            lb.select(3, &Exchange::new()),
            Err(LoadBalanceError::InvalidConfig(_))
        ));
    }
}
