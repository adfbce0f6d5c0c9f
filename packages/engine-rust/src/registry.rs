//! Lifecycle registry for the engine's managed services.

use std::any::Any;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Context handed to services when the engine starts.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub config: Arc<EngineConfig>,
}

// ---------------------------------------------------------------------------
// ManagedService trait
// ---------------------------------------------------------------------------

/// Engine component with a start/stop lifecycle (the saga service, for one).
///
/// The `Any` bound lets callers get the concrete service back with
/// `ServiceRegistry::get::<T>()`.
#[async_trait]
pub trait ManagedService: Send + Sync + Any {
    /// Unique name of this service (e.g., `"saga"`).
    fn name(&self) -> &'static str;

    /// Applies configuration and acquires runtime resources.
    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()>;

    /// Releases runtime resources. With `terminate`, pending work is
    /// abandoned instead of drained.
    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

struct Registered {
    service: Arc<dyn ManagedService>,
    any: Arc<dyn Any + Send + Sync>,
}

/// Ordered set of managed services.
///
/// Services start in registration order and stop in reverse order. Names
/// are unique: registering a second service under a taken name replaces
/// the first in its original slot.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<Vec<Registered>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared service. The caller keeps its own `Arc`.
    pub fn register<T: ManagedService>(&self, service: Arc<T>) {
        let entry = Registered {
            service: service.clone(),
            any: service,
        };
        let mut services = self.services.write();
        match services
            .iter_mut()
            .find(|existing| existing.service.name() == entry.service.name())
        {
            Some(existing) => {
                debug!(service = entry.service.name(), "replacing registered service");
                *existing = entry;
            }
            None => services.push(entry),
        }
    }

    /// The registered service of concrete type `T`, if any.
    #[must_use]
    pub fn get<T: ManagedService>(&self) -> Option<Arc<T>> {
        self.services
            .read()
            .iter()
            .find_map(|entry| entry.any.clone().downcast::<T>().ok())
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.services
            .read()
            .iter()
            .find(|entry| entry.service.name() == name)
            .map(|entry| Arc::clone(&entry.service))
    }

    /// Service names in start order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.services.read().iter().map(|entry| entry.service.name()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn ManagedService>> {
        self.services
            .read()
            .iter()
            .map(|entry| Arc::clone(&entry.service))
            .collect()
    }

    /// Initializes services in registration order.
    ///
    /// If one fails, the services already initialized are terminated in
    /// reverse order before the error is returned.
    ///
    /// # Errors
    ///
    /// The failing service's `init` error, with the service name attached.
    pub async fn init_all(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let services = self.snapshot();
        for (position, service) in services.iter().enumerate() {
            debug!(service = service.name(), "initializing service");
            if let Err(err) = service.init(ctx).await {
                for started in services[..position].iter().rev() {
                    if let Err(rollback) = started.shutdown(true).await {
                        warn!(service = started.name(), error = %rollback, "rollback shutdown failed");
                    }
                }
                return Err(err).with_context(|| format!("initializing service '{}'", service.name()));
            }
        }
        Ok(())
    }

    /// Shuts every service down in reverse registration order.
    ///
    /// A failing service does not stop the others from shutting down.
    ///
    /// # Errors
    ///
    /// The first `shutdown` failure encountered.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        let mut first_error = None;
        for service in self.snapshot().iter().rev() {
            debug!(service = service.name(), terminate, "shutting down service");
            if let Err(err) = service.shutdown(terminate).await {
                warn!(service = service.name(), error = %err, "service shutdown failed");
                first_error.get_or_insert(
                    err.context(format!("shutting down service '{}'", service.name())),
                );
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        fail_init: bool,
        fail_shutdown: bool,
        log: Log,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                fail_init: false,
                fail_shutdown: false,
                log: log.clone(),
            }
        }
    }

    #[async_trait]
    impl ManagedService for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("init:{}", self.name));
            if self.fail_init {
                anyhow::bail!("{} refused to start", self.name);
            }
            Ok(())
        }

        async fn shutdown(&self, terminate: bool) -> anyhow::Result<()> {
            self.log.lock().push(format!("shutdown:{}:{terminate}", self.name));
            if self.fail_shutdown {
                anyhow::bail!("{} stuck", self.name);
            }
            Ok(())
        }
    }

    struct Standby;

    #[async_trait]
    impl ManagedService for Standby {
        fn name(&self) -> &'static str {
            "standby"
        }
        async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
            Ok(())
        }
        async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn ctx() -> ServiceContext {
        ServiceContext {
            config: Arc::new(EngineConfig::default()),
        }
    }

    #[test]
    fn lookup_by_name_and_type() {
        let log = Log::default();
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Recorder::new("saga", &log)));
        registry.register(Arc::new(Standby));

        assert_eq!(registry.get_by_name("saga").unwrap().name(), "saga");
        assert!(registry.get_by_name("missing").is_none());
        assert_eq!(registry.get::<Standby>().unwrap().name(), "standby");
        assert_eq!(registry.names(), vec!["saga", "standby"]);
    }

    #[test]
    fn same_name_replaces_in_place() {
        let log = Log::default();
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Recorder::new("a", &log)));
        registry.register(Arc::new(Standby));
        let replacement = Arc::new(Recorder::new("a", &log));
        registry.register(replacement.clone());

        assert_eq!(registry.names(), vec!["a", "standby"]);
        assert!(Arc::ptr_eq(&registry.get::<Recorder>().unwrap(), &replacement));
    }

    #[tokio::test]
    async fn start_in_order_stop_in_reverse() {
        let log = Log::default();
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Recorder::new("first", &log)));
        registry.register(Arc::new(Recorder::new("second", &log)));

        registry.init_all(&ctx()).await.unwrap();
        registry.shutdown_all(false).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["init:first", "init:second", "shutdown:second:false", "shutdown:first:false"]
        );
    }

    #[tokio::test]
    async fn failed_init_terminates_started_services() {
        let log = Log::default();
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Recorder::new("first", &log)));
        registry.register(Arc::new(Recorder {
            fail_init: true,
            ..Recorder::new("second", &log)
        }));
        registry.register(Arc::new(Recorder::new("third", &log)));

        let err = registry.init_all(&ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "initializing service 'second'");
        assert_eq!(*log.lock(), vec!["init:first", "init:second", "shutdown:first:true"]);
    }

    #[tokio::test]
    async fn failed_shutdown_does_not_skip_the_rest() {
        let log = Log::default();
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Recorder::new("first", &log)));
        registry.register(Arc::new(Recorder {
            fail_shutdown: true,
            ..Recorder::new("second", &log)
        }));

        let err = registry.shutdown_all(false).await.unwrap_err();
        assert_eq!(err.to_string(), "shutting down service 'second'");
        assert_eq!(*log.lock(), vec!["shutdown:second:false", "shutdown:first:false"]);
    }
}
