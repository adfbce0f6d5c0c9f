//! Runs a failover route and a two-step saga against in-memory endpoints.
//!
//! ```text
//! RUST_LOG=debug cargo run --bin mediator-demo -- --json-logs
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mediator_core::expression::header;
use mediator_core::{Exchange, ExchangeError, MockEndpoint, MockJournal};
use mediator_engine::dispatch::LoggingListener;
use mediator_engine::{
    Delivery, DispatchError, EngineConfig, LoadBalancerDefinition, MediationEngine, SagaStep,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mediator-demo", about = "Saga and load-balancing walkthrough")]
struct Args {
    /// JSON engine configuration; defaults apply when omitted.
    #[arg(long, env = "MEDIATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "MEDIATOR_JSON_LOGS")]
    json_logs: bool,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if config.node_id.is_empty() {
        config.node_id = "demo".to_string();
    }
    // Keep the walkthrough short when no file overrides the retry delay.
    if args.config.is_none() {
        config.saga.retry_delay_ms = 100;
    }

    let engine = MediationEngine::new(config);
    let journal = MockJournal::default();

    // Failover: the primary refuses connections, the backup answers.
    let primary = Arc::new(
        MockEndpoint::with_journal("mock:inventory-primary", journal.clone())
            .always_failing(ExchangeError::connect("connection refused")),
    );
    let backup = Arc::new(MockEndpoint::with_journal("mock:inventory-backup", journal.clone()));
    engine.register_endpoint(primary);
    engine.register_endpoint(backup);
    let targets = ["mock:inventory-primary", "mock:inventory-backup"]
        .iter()
        .filter_map(|uri| engine.endpoint_processor(uri))
        .collect();
    let definition: LoadBalancerDefinition =
        serde_json::from_str(r#"{"type":"failover","exceptions":["connect"],"maximum_failover_attempts":1}"#)?;
    let inventory = engine.build_balancer(&definition, targets)?;
    engine.add_route("inventory", Arc::new(inventory));

    // Saga: reserve a flight, then a hotel, then charge a card that declines.
    let cancel_flight = Arc::new(MockEndpoint::with_journal("mock:cancel-flight", journal.clone()));
    let cancel_hotel = Arc::new(MockEndpoint::with_journal("mock:cancel-hotel", journal.clone()));
    let payment = Arc::new(
        MockEndpoint::with_journal("mock:payment", journal.clone())
            .always_failing(ExchangeError::rejected("card declined")),
    );
    let hotel = engine.saga_processor(payment).with_step(
        SagaStep::builder()
            .compensation(cancel_hotel)
            .option("booking", header("booking"))
            .timeout(Duration::from_secs(30))
            .build(),
    );
    let flight = engine.saga_processor(Arc::new(hotel)).with_step(
        SagaStep::builder()
            .compensation(cancel_flight)
            .option("booking", header("booking"))
            .build(),
    );
    engine.add_route("trip", Arc::new(flight));

    let source = engine.start(Arc::new(LoggingListener)).await?;

    let reply = source
        .request(Delivery::new("inventory", Exchange::with_body("sku-42")))
        .await?;
    info!(exchange_id = reply.id(), "inventory answered by backup");

    let trip = Exchange::with_body("lisbon").header_with("booking", "b-1001");
    match source.request(Delivery::new("trip", trip)).await {
        Ok(_) => warn!("trip unexpectedly succeeded"),
        Err(DispatchError::Failed { error, exchange, .. }) => {
            info!(saga_id = ?exchange.saga_id(), error = %error, "trip failed and was compensated");
        }
        Err(other) => return Err(other.into()),
    }

    engine.stop().await?;
    info!(deliveries = ?*journal.lock(), "delivery order");
    Ok(())
}
