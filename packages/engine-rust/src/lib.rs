//! Mediator Engine: saga coordination, load-balanced routing and a tower
//! dispatch pipeline on top of `mediator-core`.

pub mod balancer;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod registry;
pub mod saga;
pub mod scheduler;

pub use balancer::{
    LoadBalanceError, LoadBalancedProcessor, LoadBalancer, LoadBalancerDefinition,
    LoadBalancerRegistry,
};
pub use config::{DispatchConfig, EngineConfig, SagaConfig};
pub use dispatch::{Delivery, DeliveryListener, DispatchError, DispatchLoop, DispatchSource};
pub use engine::MediationEngine;
pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
pub use saga::{
    SagaCompletionMode, SagaCoordinator, SagaError, SagaProcessor, SagaPropagation, SagaService,
    SagaStatus, SagaStep,
};
pub use scheduler::Scheduler;
