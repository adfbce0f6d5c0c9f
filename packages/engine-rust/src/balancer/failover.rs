use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mediator_core::{deliver, ErrorKind, Exchange, ExchangeError, Processor};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::round_robin::RoundRobinLoadBalancer;
use super::{ensure_candidates, LoadBalanceError, LoadBalancer};

/// Decides which failures trigger a failover to the next candidate.
#[derive(Clone)]
pub enum FailoverMatcher {
    /// Fail over on these kinds; an empty list matches every failure.
    Kinds(Vec<ErrorKind>),
    /// Fail over when the predicate returns `true`.
    Predicate(Arc<dyn Fn(&ExchangeError) -> bool + Send + Sync>),
}

impl FailoverMatcher {
    #[must_use]
    pub fn matches(&self, error: &ExchangeError) -> bool {
        match self {
            FailoverMatcher::Kinds(kinds) => kinds.is_empty() || kinds.contains(&error.kind),
            FailoverMatcher::Predicate(predicate) => predicate(error),
        }
    }
}

impl Default for FailoverMatcher {
    fn default() -> Self {
        FailoverMatcher::Kinds(Vec::new())
    }
}

impl fmt::Debug for FailoverMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverMatcher::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            FailoverMatcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Redelivers to the next candidate when a delivery fails with a matching error.
///
/// `maximum_failover_attempts` bounds the failovers after the initial
/// delivery: `-1` is unlimited, `0` disables failover. Without round robin
/// each candidate is tried at most once per exchange, starting at the first
/// candidate (or the last good one when sticky) and wrapping around. With
/// round robin the candidate sequence continues from a counter shared across
/// exchanges and keeps cycling while attempts remain, so an unlimited policy
/// keeps retrying until some candidate accepts or the caller's timeout
/// drops the future. The task yields after every full pass over the
/// candidates.
#[derive(Debug)]
pub struct FailoverLoadBalancer {
    matcher: FailoverMatcher,
    round_robin: bool,
    sticky: bool,
    maximum_failover_attempts: i32,
    counter: RoundRobinLoadBalancer,
    last_good: Mutex<Option<usize>>,
}

impl FailoverLoadBalancer {
    /// Fails over on any error, without round robin or stickiness, unlimited.
    #[must_use]
    pub fn new() -> Self {
        Self {
            matcher: FailoverMatcher::default(),
            round_robin: false,
            sticky: false,
            maximum_failover_attempts: -1,
            counter: RoundRobinLoadBalancer::new(),
            last_good: Mutex::new(None),
        }
    }

    /// Only fail over on these error kinds (empty list = any error).
    #[must_use]
    pub fn on_kinds(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.matcher = FailoverMatcher::Kinds(kinds);
        self
    }

    /// Fail over when `predicate` returns `true`.
    #[must_use]
    pub fn on_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExchangeError) -> bool + Send + Sync + 'static,
    {
        self.matcher = FailoverMatcher::Predicate(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn round_robin(mut self, enabled: bool) -> Self {
        self.round_robin = enabled;
        self
    }

    #[must_use]
    pub fn sticky(mut self, enabled: bool) -> Self {
        self.sticky = enabled;
        self
    }

    #[must_use]
    pub fn maximum_failover_attempts(mut self, attempts: i32) -> Self {
        self.maximum_failover_attempts = attempts;
        self
    }

    /// Index of the last candidate that accepted an exchange, when sticky.
    #[must_use]
    pub fn last_good(&self) -> Option<usize> {
        *self.last_good.lock()
    }

    fn start_index(&self, candidates: usize) -> usize {
        if self.sticky {
            if let Some(index) = *self.last_good.lock() {
                if index < candidates {
                    return index;
                }
            }
        }
        if self.round_robin {
            self.counter.next_index(candidates)
        } else {
            0
        }
    }

    fn next_index(&self, current: usize, candidates: usize) -> usize {
        if self.round_robin {
            self.counter.next_index(candidates)
        } else {
            (current + 1) % candidates
        }
    }

    fn may_fail_over(&self, failovers: usize, candidates: usize) -> bool {
        if !self.round_robin && failovers + 1 >= candidates {
            return false;
        }
        match usize::try_from(self.maximum_failover_attempts) {
            Ok(max) => failovers < max,
            Err(_) => true,
        }
    }
}

impl Default for FailoverLoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for FailoverLoadBalancer {
    fn name(&self) -> &'static str {
        "failover"
    }

    fn select(&self, candidates: usize, _exchange: &Exchange) -> Result<usize, LoadBalanceError> {
        ensure_candidates(candidates)?;
        Ok(self.start_index(candidates))
    }

    async fn process(
        &self,
        targets: &[Arc<dyn Processor>],
        exchange: &mut Exchange,
    ) -> Result<(), LoadBalanceError> {
        let candidates = targets.len();
        let mut index = self.select(candidates, exchange)?;
        let mut failovers = 0usize;

        loop {
            let target = targets.get(index).ok_or(LoadBalanceError::NoCandidates)?;
            let mut attempt = exchange.clone();

            match deliver(target.as_ref(), &mut attempt).await {
                Ok(()) => {
                    if self.sticky {
                        *self.last_good.lock() = Some(index);
                    }
                    *exchange = attempt;
                    return Ok(());
                }
                Err(err) if !self.matcher.matches(&err) => {
                    *exchange = attempt;
                    return Err(LoadBalanceError::Delivery(err));
                }
                Err(err) => {
                    if !self.may_fail_over(failovers, candidates) {
                        warn!(candidate = index, failovers, error = %err, "failover exhausted");
                        *exchange = attempt;
                        return Err(LoadBalanceError::Exhausted {
                            attempts: failovers,
                            last: err,
                        });
                    }
                    failovers += 1;
                    let next = self.next_index(index, candidates);
                    debug!(from = index, to = next, attempt = failovers, error = %err, "failing over");
                    index = next;
                    // Round robin may cycle indefinitely; give timers and
                    // cancellation a chance after every full pass.
                    if self.round_robin && failovers % candidates == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
    }
}
