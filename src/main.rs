//! Gateway binary: wire configuration, signals, and the long-lived tasks.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use respgate::config::Config;
use respgate::gateway::{ClientTable, ConsumerManager, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env());
    info!(addr = %config.listen_addr, brokers = %config.bootstrap_servers, "starting respgate");

    let cancel = CancellationToken::new();

    // SIGINT drives the one root token; every task observes it.
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("termination signal received");
                cancel.cancel();
            }
        }
    });

    let clients = Arc::new(ClientTable::new());
    let manager = Arc::new(ConsumerManager::with_kafka(
        config.clone(),
        clients.clone(),
        cancel.clone(),
    ));

    // Reaper plus end-of-life consumer teardown.
    let manager_task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.run().await }
    });

    let server = Server::new(config.clone(), manager, clients, cancel.clone());
    if let Err(e) = server.listen_and_serve(&config.listen_addr).await {
        error!(error = %e, "server failed");
        std::process::exit(1);
    }

    // serve() only returns after cancellation; wait for the manager to
    // finish tearing down consumers before exiting 0.
    let _ = manager_task.await;
    info!("shutdown complete");
}
