//! Background dispatch loop feeding deliveries through the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use mediator_core::Exchange;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, warn};

use super::delivery::{Delivery, DispatchError};
use super::middleware::DispatchPipeline;
use super::worker::{BackgroundRunnable, BackgroundWorker};
use crate::config::DispatchConfig;

// ---------------------------------------------------------------------------
// DeliveryListener
// ---------------------------------------------------------------------------

/// Observer of every finished delivery.
pub trait DeliveryListener: Send + Sync {
    fn on_success(&self, route_id: &str, exchange: &Exchange);

    fn on_failure(&self, route_id: &str, error: &DispatchError);
}

/// Listener that only logs.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl DeliveryListener for LoggingListener {
    fn on_success(&self, route_id: &str, exchange: &Exchange) {
        debug!(route = route_id, exchange_id = exchange.id(), "delivered");
    }

    fn on_failure(&self, route_id: &str, error: &DispatchError) {
        warn!(route = route_id, outcome = error.outcome(), error = %error, "delivery failed");
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

type Reply = oneshot::Sender<Result<Exchange, DispatchError>>;

/// A delivery queued on the dispatch loop, with an optional reply channel.
pub struct Submission {
    delivery: Delivery,
    reply: Option<Reply>,
}

// ---------------------------------------------------------------------------
// DispatchRunnable
// ---------------------------------------------------------------------------

struct DispatchRunnable {
    pipeline: DispatchPipeline,
    listener: Arc<dyn DeliveryListener>,
    in_flight: TaskTracker,
}

#[async_trait]
impl BackgroundRunnable for DispatchRunnable {
    type Task = Submission;

    async fn run(&mut self, task: Submission) {
        let pipeline = self.pipeline.clone();
        let listener = Arc::clone(&self.listener);
        // Deliveries run concurrently; the load-shed layer bounds them.
        self.in_flight.spawn(async move {
            let Submission { delivery, reply } = task;
            let route_id = delivery.route_id.clone();
            let result = pipeline.oneshot(delivery).await;
            match &result {
                Ok(exchange) => listener.on_success(&route_id, exchange),
                Err(err) => listener.on_failure(&route_id, err),
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
    }

    async fn on_tick(&mut self) {
        debug!(in_flight = self.in_flight.len(), "dispatch loop tick");
    }

    async fn shutdown(&mut self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        debug!("dispatch loop drained");
    }
}

// ---------------------------------------------------------------------------
// DispatchSource
// ---------------------------------------------------------------------------

/// Cloneable handle for submitting deliveries to a running dispatch loop.
#[derive(Clone)]
pub struct DispatchSource {
    tx: mpsc::Sender<Submission>,
}

impl DispatchSource {
    /// Queues a delivery; its outcome goes to the listener only.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatch loop has stopped.
    pub async fn submit(&self, delivery: Delivery) -> anyhow::Result<()> {
        self.tx
            .send(Submission {
                delivery,
                reply: None,
            })
            .await
            .map_err(|_| anyhow::anyhow!("dispatch loop stopped"))
    }

    /// Queues a delivery and waits for its outcome.
    ///
    /// # Errors
    ///
    /// The delivery's `DispatchError`, or `DispatchError::Rejected` if the
    /// loop stopped before answering.
    pub async fn request(&self, delivery: Delivery) -> Result<Exchange, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Submission {
                delivery,
                reply: Some(reply),
            })
            .await
            .map_err(|_| DispatchError::Rejected("dispatch loop stopped".to_string()))?;
        rx.await
            .map_err(|_| DispatchError::Rejected("dispatch loop dropped the delivery".to_string()))?
    }
}

// ---------------------------------------------------------------------------
// DispatchLoop
// ---------------------------------------------------------------------------

/// Consumes submitted deliveries and runs each through the dispatch pipeline.
///
/// Stopping the loop closes intake, dispatches what is already queued and
/// waits for every in-flight delivery.
pub struct DispatchLoop {
    worker: BackgroundWorker<DispatchRunnable>,
    source: DispatchSource,
}

impl DispatchLoop {
    /// Spawns the loop on the current tokio runtime.
    #[must_use]
    pub fn start(
        pipeline: DispatchPipeline,
        listener: Arc<dyn DeliveryListener>,
        config: &DispatchConfig,
    ) -> Self {
        let runnable = DispatchRunnable {
            pipeline,
            listener,
            in_flight: TaskTracker::new(),
        };
        let worker = BackgroundWorker::start(runnable, config.tick_interval(), config.channel_capacity);
        let source = DispatchSource {
            tx: worker.sender(),
        };
        Self { worker, source }
    }

    #[must_use]
    pub fn source(&self) -> DispatchSource {
        self.source.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stops intake and waits for in-flight deliveries to finish.
    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
