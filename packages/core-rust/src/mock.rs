//! Recording endpoint for tests and demos.
//!
//! `MockEndpoint` stores every exchange it receives and can be scripted to
//! fail a number of deliveries before succeeding. Several mocks can share a
//! [`MockJournal`] to observe the global order of deliveries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::traits::{Endpoint, Processor};

/// Shared, ordered log of endpoint URIs that received a delivery.
pub type MockJournal = Arc<Mutex<Vec<String>>>;

/// Scripted outcome for upcoming deliveries.
#[derive(Debug, Clone)]
enum Script {
    /// Fail the next deliveries, popping one error per delivery.
    FailNext(VecDeque<ExchangeError>),
    /// Fail every delivery with this error.
    Always(ExchangeError),
}

/// In-memory endpoint that records what it receives.
pub struct MockEndpoint {
    uri: String,
    received: Mutex<Vec<Exchange>>,
    attempts: AtomicUsize,
    script: Mutex<Option<Script>>,
    journal: Option<MockJournal>,
}

impl MockEndpoint {
    /// Creates a mock that accepts every exchange.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            received: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            script: Mutex::new(None),
            journal: None,
        }
    }

    /// Creates a mock that appends its URI to `journal` on every delivery attempt.
    pub fn with_journal(uri: impl Into<String>, journal: MockJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(uri)
        }
    }

    /// Fails the next `times` deliveries with `error`, then accepts again.
    #[must_use]
    pub fn failing_times(self, times: usize, error: ExchangeError) -> Self {
        self.fail_next(times, error);
        self
    }

    /// Scripts the next `times` deliveries to fail with `error`.
    pub fn fail_next(&self, times: usize, error: ExchangeError) {
        *self.script.lock() = Some(Script::FailNext(
            std::iter::repeat(error).take(times).collect(),
        ));
    }

    /// Fails every delivery with `error`.
    #[must_use]
    pub fn always_failing(self, error: ExchangeError) -> Self {
        *self.script.lock() = Some(Script::Always(error));
        self
    }

    /// Removes any failure script; subsequent deliveries succeed.
    pub fn heal(&self) {
        *self.script.lock() = None;
    }

    /// Exchanges accepted so far, in arrival order.
    pub fn received(&self) -> Vec<Exchange> {
        self.received.lock().clone()
    }

    /// Number of exchanges accepted so far.
    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }

    /// Number of delivery attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<ExchangeError> {
        let mut script = self.script.lock();
        match script.as_mut() {
            Some(Script::Always(err)) => Some(err.clone()),
            Some(Script::FailNext(queue)) => {
                let err = queue.pop_front();
                if queue.is_empty() {
                    *script = None;
                }
                err
            }
            None => None,
        }
    }
}

#[async_trait]
impl Processor for MockEndpoint {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            journal.lock().push(self.uri.clone());
        }
        if let Some(err) = self.next_failure() {
            tracing::debug!(uri = %self.uri, error = %err, "mock endpoint failing delivery");
            return Err(err);
        }
        self.received.lock().push(exchange.clone());
        Ok(())
    }
}

impl Endpoint for MockEndpoint {
    fn uri(&self) -> &str {
        &self.uri
    }
}

impl std::fmt::Debug for MockEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEndpoint")
            .field("uri", &self.uri)
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[tokio::test]
    async fn records_accepted_exchanges() {
        let mock = MockEndpoint::new("mock:a");
        let mut ex = Exchange::with_body("hello");
        mock.process(&mut ex).await.unwrap();
        assert_eq!(mock.received_count(), 1);
        assert_eq!(mock.received()[0].body, Value::from("hello"));
        assert_eq!(mock.uri(), "mock:a");
    }

    #[tokio::test]
    async fn fails_scripted_number_of_times() {
        let mock = MockEndpoint::new("mock:flaky").failing_times(2, ExchangeError::io("down"));
        let mut ex = Exchange::new();
        assert!(mock.process(&mut ex).await.is_err());
        assert!(mock.process(&mut ex).await.is_err());
        assert!(mock.process(&mut ex).await.is_ok());
        assert_eq!(mock.attempts(), 3);
        assert_eq!(mock.received_count(), 1);
    }

    #[tokio::test]
    async fn journal_is_shared_between_mocks() {
        let journal = MockJournal::default();
        let a = MockEndpoint::with_journal("mock:a", journal.clone());
        let b = MockEndpoint::with_journal("mock:b", journal.clone());
        let mut ex = Exchange::new();
        b.process(&mut ex).await.unwrap();
        a.process(&mut ex).await.unwrap();
        assert_eq!(*journal.lock(), vec!["mock:b", "mock:a"]);
    }
}
