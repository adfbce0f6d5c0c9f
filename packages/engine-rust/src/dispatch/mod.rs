//! Delivery dispatch framework.
//!
//! 1. **Delivery** (`delivery`): `Delivery` unit of work and `DispatchError`
//! 2. **Routing** (`router`): dispatch to the processor registered for a route
//! 3. **Middleware** (`middleware`): Tower layers (load shedding, timeout, metrics)
//! 4. **Background workers** (`worker`): queued and periodic tasks
//! 5. **Dispatch loop** (`dispatch_loop`): bounded intake feeding the pipeline

pub mod delivery;
pub mod dispatch_loop;
pub mod middleware;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use delivery::{Delivery, DispatchError, DispatchFuture};
pub use dispatch_loop::{DeliveryListener, DispatchLoop, DispatchSource, LoggingListener};
pub use middleware::{build_dispatch_pipeline, DispatchPipeline};
pub use router::ExchangeRouter;
pub use worker::{BackgroundRunnable, BackgroundWorker};
