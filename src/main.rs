//! Route registry service.
//!
//! Reads registration events as `<subject> <json>` lines from stdin, keeps
//! the route table current and serves it over the status endpoint.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use route_registry::mbus::{LineBus, LivenessProbe, RegistrySubscriber};
use route_registry::{status, Config, RouteRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };

    tracing::info!(
        prune_interval = ?config.registry.prune_interval,
        stale_threshold = ?config.registry.stale_threshold,
        "route-registry starting"
    );

    let bus = Arc::new(LineBus::new());
    let registry = Arc::new(RouteRegistry::new(
        &config.registry,
        Arc::clone(&bus) as Arc<dyn LivenessProbe>,
    ));
    registry.start_pruning_cycle();

    let listener = tokio::net::TcpListener::bind(config.status.listen)
        .await
        .with_context(|| format!("binding status server to {}", config.status.listen))?;
    tracing::info!(addr = %config.status.listen, "status server listening");
    let status_server = tokio::spawn(status::serve(listener, Arc::clone(&registry)));

    let subscriber = RegistrySubscriber::new(Arc::clone(&registry));
    let events = async {
        if let Err(e) = bus.run(BufReader::new(tokio::io::stdin()), &subscriber).await {
            tracing::error!(error = %e, "reading registration events failed");
        }
        // Keep serving the last known table until shutdown.
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = events => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for shutdown signal")?;
            tracing::info!("shutdown signal received");
        }
    }

    registry.stop_pruning_cycle();
    status_server.abort();
    tracing::info!(routes = registry.num_routes(), "route-registry stopped");

    Ok(())
}
