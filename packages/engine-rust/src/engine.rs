//! Engine facade wiring services, routes and the dispatch loop together.

use std::sync::Arc;

use dashmap::DashMap;
use mediator_core::{Endpoint, Processor};
use parking_lot::Mutex;
use tracing::info;

use crate::balancer::{LoadBalanceError, LoadBalancedProcessor, LoadBalancerDefinition, LoadBalancerRegistry};
use crate::config::EngineConfig;
use crate::dispatch::{build_dispatch_pipeline, DeliveryListener, DispatchLoop, DispatchSource, ExchangeRouter};
use crate::registry::{ServiceContext, ServiceRegistry};
use crate::saga::{SagaProcessor, SagaService};

/// One mediation engine instance.
///
/// Owns the managed services, the saga service, custom load-balancer
/// policies, endpoints keyed by URI and the route table. Nothing here is
/// process-global: two engines in one process share no state.
pub struct MediationEngine {
    config: Arc<EngineConfig>,
    services: ServiceRegistry,
    sagas: Arc<SagaService>,
    balancers: LoadBalancerRegistry,
    endpoints: DashMap<String, Arc<dyn Endpoint>>,
    router: ExchangeRouter,
    dispatch: Mutex<Option<DispatchLoop>>,
}

impl MediationEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let sagas = Arc::new(SagaService::with_config(&config.saga));
        let services = ServiceRegistry::new();
        services.register(Arc::clone(&sagas));
        Self {
            config: Arc::new(config),
            services,
            sagas,
            balancers: LoadBalancerRegistry::new(),
            endpoints: DashMap::new(),
            router: ExchangeRouter::new(),
            dispatch: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    #[must_use]
    pub fn sagas(&self) -> &Arc<SagaService> {
        &self.sagas
    }

    /// Registry consulted by `custom` load-balancer definitions.
    #[must_use]
    pub fn balancers(&self) -> &LoadBalancerRegistry {
        &self.balancers
    }

    #[must_use]
    pub fn router(&self) -> &ExchangeRouter {
        &self.router
    }

    // -----------------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------------

    /// Registers (or replaces) an endpoint under its URI.
    pub fn register_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
        self.endpoints.insert(endpoint.uri().to_string(), endpoint);
    }

    #[must_use]
    pub fn endpoint(&self, uri: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.get(uri).map(|entry| Arc::clone(entry.value()))
    }

    /// The registered endpoint as a route or balancer target.
    #[must_use]
    pub fn endpoint_processor(&self, uri: &str) -> Option<Arc<dyn Processor>> {
        self.endpoint(uri)
            .map(|endpoint| Arc::new(endpoint) as Arc<dyn Processor>)
    }

    // -----------------------------------------------------------------------
    // Routes
    // -----------------------------------------------------------------------

    /// Registers (or replaces) a route. Routes added after `start` are
    /// visible to the running dispatch loop.
    pub fn add_route(&self, route_id: impl Into<String>, processor: Arc<dyn Processor>) {
        self.router.register(route_id, processor);
    }

    /// Turns a declarative policy into a processor spreading exchanges over
    /// `targets`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` or `UnknownReference` when the definition
    /// cannot be built for these targets.
    pub fn build_balancer(
        &self,
        definition: &LoadBalancerDefinition,
        targets: Vec<Arc<dyn Processor>>,
    ) -> Result<LoadBalancedProcessor, LoadBalanceError> {
        let balancer = definition.build(targets.len(), &self.balancers)?;
        Ok(LoadBalancedProcessor::new(balancer, targets))
    }

    /// A saga-binding processor in front of `next`, using this engine's
    /// saga service.
    #[must_use]
    pub fn saga_processor(&self, next: Arc<dyn Processor>) -> SagaProcessor {
        SagaProcessor::new(Arc::clone(&self.sagas), next)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Initializes managed services in registration order and starts the
    /// dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is already started or a service fails
    /// to initialize.
    pub async fn start(&self, listener: Arc<dyn DeliveryListener>) -> anyhow::Result<DispatchSource> {
        if self.dispatch.lock().is_some() {
            anyhow::bail!("engine already started");
        }
        let ctx = ServiceContext {
            config: Arc::clone(&self.config),
        };
        self.services.init_all(&ctx).await?;

        let pipeline = build_dispatch_pipeline(self.router.clone(), &self.config.dispatch);
        let dispatch = DispatchLoop::start(pipeline, listener, &self.config.dispatch);
        let source = dispatch.source();
        *self.dispatch.lock() = Some(dispatch);
        info!(
            node_id = %self.config.node_id,
            services = ?self.services.names(),
            "mediation engine started"
        );
        Ok(source)
    }

    /// Submission handle of the running dispatch loop.
    #[must_use]
    pub fn source(&self) -> Option<DispatchSource> {
        self.dispatch.lock().as_ref().map(DispatchLoop::source)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.dispatch.lock().is_some()
    }

    /// Drains the dispatch loop, then shuts services down in reverse
    /// registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if a service fails to shut down.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let dispatch = self.dispatch.lock().take();
        if let Some(mut dispatch) = dispatch {
            dispatch.stop().await;
        }
        self.services.shutdown_all(false).await?;
        info!(node_id = %self.config.node_id, "mediation engine stopped");
        Ok(())
    }
}

impl Default for MediationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
