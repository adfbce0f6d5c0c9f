use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::coordinator::SagaCoordinator;
use super::SagaError;
use crate::config::SagaConfig;
use crate::registry::{ManagedService, ServiceContext};
use crate::scheduler::Scheduler;

/// State shared between the service and every coordinator it creates.
pub(crate) struct SagaShared {
    scheduler: ArcSwapOption<Scheduler>,
    max_retry_attempts: AtomicU32,
    retry_delay_ms: AtomicU64,
    pub(crate) sagas: DashMap<String, Arc<SagaCoordinator>>,
}

impl SagaShared {
    pub(crate) fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.load_full()
    }

    pub(crate) fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.load(Ordering::Relaxed))
    }
}

/// Registry of in-memory sagas and owner of the scheduler they share.
///
/// One instance is created per engine and handed to every caller that needs
/// it; there is no process-global registry. Coordinators are evicted once
/// they reach a terminal status.
pub struct SagaService {
    shared: Arc<SagaShared>,
}

impl SagaService {
    /// Creates a stopped service with default retry settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&SagaConfig::default())
    }

    /// Creates a stopped service with the given retry settings.
    #[must_use]
    pub fn with_config(config: &SagaConfig) -> Self {
        Self {
            shared: Arc::new(SagaShared {
                scheduler: ArcSwapOption::empty(),
                max_retry_attempts: AtomicU32::new(config.max_retry_attempts),
                retry_delay_ms: AtomicU64::new(config.retry_delay_ms),
                sagas: DashMap::new(),
            }),
        }
    }

    /// Creates the shared scheduler if it does not exist yet.
    pub fn start(&self) {
        self.shared.scheduler.rcu(|current| {
            current
                .clone()
                .or_else(|| Some(Arc::new(Scheduler::new())))
        });
    }

    /// Cancels pending timers, waits for running finalizations and drops the scheduler.
    pub async fn stop(&self) {
        if let Some(scheduler) = self.shared.scheduler.swap(None) {
            scheduler.shutdown().await;
        }
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.shared.scheduler.load().is_some()
    }

    /// Creates and registers a coordinator with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::NotStarted` if the service has no scheduler.
    pub fn new_saga(&self) -> Result<Arc<SagaCoordinator>, SagaError> {
        if !self.is_started() {
            return Err(SagaError::NotStarted);
        }
        let id = Uuid::new_v4().to_string();
        let coordinator = SagaCoordinator::new(id.clone(), Arc::clone(&self.shared));
        self.shared.sagas.insert(id.clone(), Arc::clone(&coordinator));
        tracing::debug!(saga_id = %id, "saga created");
        Ok(coordinator)
    }

    /// Looks up a live saga. Finished sagas are no longer registered.
    #[must_use]
    pub fn get_saga(&self, id: &str) -> Option<Arc<SagaCoordinator>> {
        self.shared.sagas.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live sagas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.sagas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.sagas.is_empty()
    }

    #[must_use]
    pub fn max_retry_attempts(&self) -> u32 {
        self.shared.max_retry_attempts()
    }

    /// Retries after the first failed finalization attempt; read at finalization time.
    pub fn set_max_retry_attempts(&self, attempts: u32) {
        self.shared
            .max_retry_attempts
            .store(attempts, Ordering::Relaxed);
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.shared.retry_delay()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn set_retry_delay(&self, delay: Duration) {
        self.shared
            .retry_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

impl Default for SagaService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManagedService for SagaService {
    fn name(&self) -> &'static str {
        "saga"
    }

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        self.set_max_retry_attempts(ctx.config.saga.max_retry_attempts);
        self.set_retry_delay(ctx.config.saga.retry_delay());
        self.start();
        Ok(())
    }

    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()> {
        if terminate {
            // Running finalizations are left to finish on their own.
            if let Some(scheduler) = self.shared.scheduler.swap(None) {
                scheduler.cancel();
            }
        } else {
            self.stop().await;
        }
        Ok(())
    }
}
