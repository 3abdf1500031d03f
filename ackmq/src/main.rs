use std::{net::SocketAddr, sync::Arc};

use ackmq::{
    config::parse_config,
    listeners::start_listeners,
    run_webserver, AppState,
};
use ackmq_broker::in_memory::InMemoryBroker;
use ackmq_models::errors::{RuntimeError, SendableError};
use ackmq_utilities::startup;
use log::{error, info};
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    let config = parse_config()?;
    startup::startup("ackmq", config.log_file.as_deref())?;

    info!(
        "Redelivering up to {} times, starting at {:?} (exponential: {})",
        config.policy.max_redeliveries(),
        config.policy.initial_delay(),
        config.policy.use_exponential_backoff()
    );

    let broker = InMemoryBroker::connect(config.broker.clone())
        .map_err(|err| RuntimeError::boxed("ackmq.broker.connect", err))?;
    let subscriptions = start_listeners(&broker, &config)
        .await
        .map_err(|err| RuntimeError::boxed("ackmq.broker.subscribe", err))?;

    let shutdown = Arc::new(Notify::new());
    let shutdown_listener = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", err);
            return;
        }
        info!("Shutdown signal received, stopping ackmq...");
        shutdown_listener.notify_one();
    });

    let state = AppState::new(
        Arc::new(broker.clone()),
        config.queue.clone(),
        config.topic.clone(),
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let served = run_webserver(addr, state, shutdown).await;

    for subscription in subscriptions {
        subscription.close().await;
    }
    broker.close();

    served
}
